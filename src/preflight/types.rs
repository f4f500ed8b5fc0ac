//! Preflight check types and report.

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// The build cannot succeed.
    Fail,
    /// The build can continue, possibly degraded.
    Warn,
}

impl CheckStatus {
    fn tag(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
        }
    }
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, details: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.map(str::to_string),
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::new(name, CheckStatus::Pass, None)
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Pass, Some(details))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Fail, Some(details))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Warn, Some(details))
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// True when nothing failed. Warnings do not count.
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn print(&self) {
        for check in &self.checks {
            match &check.details {
                Some(details) => println!("  [{}] {}: {}", check.status.tag(), check.name, details),
                None => println!("  [{}] {}", check.status.tag(), check.name),
            }
        }

        let total = self.checks.len();
        println!(
            "  {}/{} passed, {} failed, {} warnings\n",
            self.count(CheckStatus::Pass),
            total,
            self.fail_count(),
            self.warn_count()
        );
    }
}
