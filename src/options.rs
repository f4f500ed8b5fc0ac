//! Command-line options and the validated build configuration.
//!
//! clap renders help and owns the typed flag definitions. A scan over the
//! raw arguments runs first because the build CLI has a few rules clap
//! does not express: the first positional is the device, unknown flags
//! are warned about and skipped, a repeated flag keeps its last value,
//! and `--make-flags` swallows everything after it verbatim.

use clap::{CommandFactory, Parser, ValueEnum};

use crate::error::OptionError;

/// KernelSU flavour to integrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum KsuVariant {
    /// Build without KernelSU
    #[value(name = "noksu")]
    None,
    /// Official KernelSU
    Ksu,
    /// rsuntk KernelSU fork
    Rksu,
    /// SukiSU
    Sukisu,
    /// SukiSU-Ultra
    #[value(name = "sukisu-ultra")]
    SukisuUltra,
}

impl KsuVariant {
    /// CLI spelling of the variant.
    pub fn cli_name(self) -> &'static str {
        match self {
            Self::None => "noksu",
            Self::Ksu => "ksu",
            Self::Rksu => "rksu",
            Self::Sukisu => "sukisu",
            Self::SukisuUltra => "sukisu-ultra",
        }
    }
}

/// Add-on feature set layered over KernelSU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Addon {
    /// No add-on
    #[value(name = "no")]
    None,
    /// SuSFS filesystem hiding
    Susfs,
    /// KPM runtime patching
    Kpm,
    /// SuSFS and KPM
    #[value(name = "susfs-kpm")]
    SusfsKpm,
}

/// Which ROM flavour(s) to build for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum TargetSystem {
    Aosp,
    Miui,
    /// AOSP pass followed by a MIUI pass
    All,
}

impl TargetSystem {
    /// The passes this target expands to, in build order.
    pub fn passes(self) -> Vec<SystemPass> {
        match self {
            Self::Aosp => vec![SystemPass::Aosp],
            Self::Miui => vec![SystemPass::Miui],
            Self::All => vec![SystemPass::Aosp, SystemPass::Miui],
        }
    }
}

/// One full configure/build/package pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemPass {
    Aosp,
    Miui,
}

impl SystemPass {
    /// Upper-case label used in archive names and banners.
    pub fn label(self) -> &'static str {
        match self {
            Self::Aosp => "AOSP",
            Self::Miui => "MIUI",
        }
    }
}

/// Validated build configuration. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub device: String,
    pub ksu: KsuVariant,
    pub addon: Addon,
    pub system: TargetSystem,
    pub ccache: bool,
    pub skip_clean: bool,
    pub extra_make_args: Vec<String>,
}

/// Feature switches derived from the KernelSU variant and add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub kernelsu: bool,
    pub susfs: bool,
    pub kpm: bool,
}

impl FeatureFlags {
    pub fn derive(ksu: KsuVariant, addon: Addon) -> Self {
        Self {
            kernelsu: ksu != KsuVariant::None,
            susfs: matches!(addon, Addon::Susfs | Addon::SusfsKpm),
            kpm: matches!(addon, Addon::Kpm | Addon::SusfsKpm),
        }
    }
}

impl BuildConfig {
    pub fn features(&self) -> FeatureFlags {
        FeatureFlags::derive(self.ksu, self.addon)
    }

    /// Reject combinations that can never build. Runs before anything
    /// touches the network or the filesystem.
    pub fn validate(&self) -> Result<(), OptionError> {
        if self.device.is_empty()
            || self.device.contains('/')
            || self.device.chars().any(char::is_whitespace)
        {
            return Err(OptionError::InvalidDevice(self.device.clone()));
        }
        if self.ksu == KsuVariant::Ksu && self.features().susfs {
            return Err(OptionError::IncompatibleVariant {
                variant: self.ksu.cli_name().to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(name = "akbuild")]
#[command(about = "Build an Android kernel and package it as an AnyKernel3 zip")]
#[command(
    after_help = "ENVIRONMENT:\n  TOOLCHAIN_PATH  Clang toolchain root (falls back to well-known locations)\n  CCACHE_DIR      ccache directory (default: ~/.ccache)\n  KERNEL_SOURCE   Kernel tree (default: current directory)\n\nEXAMPLE:\n  akbuild alioth --ksu sukisu-ultra --additional susfs-kpm --system miui"
)]
struct Cli {
    /// Device codename (selects <device>_defconfig)
    device: Option<String>,

    /// KernelSU variant to integrate
    #[arg(long, value_enum, value_name = "VARIANT")]
    ksu: Option<KsuVariant>,

    /// Add-on features on top of KernelSU
    #[arg(long, value_enum, value_name = "ADDON")]
    additional: Option<Addon>,

    /// ROM flavour to build for
    #[arg(long, value_enum, default_value = "miui")]
    system: TargetSystem,

    /// Build without ccache
    #[arg(long)]
    noccache: bool,

    /// Reuse the existing output directory
    #[arg(long)]
    noclean: bool,

    /// Extra arguments passed to make; consumes the rest of the command line
    #[arg(long = "make-flags", value_name = "FLAGS", num_args = 0.., allow_hyphen_values = true)]
    make_flags: Vec<String>,
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// `--help` / `-h`: print this and exit 0.
    Help(String),
    Build {
        config: BuildConfig,
        /// Skipped arguments, one message each.
        warnings: Vec<String>,
    },
}

const VALUE_FLAGS: [&str; 3] = ["--ksu", "--additional", "--system"];
const SWITCH_FLAGS: [&str; 2] = ["--noccache", "--noclean"];

fn check_value<E: ValueEnum>(flag: &str, value: &str) -> Result<(), OptionError> {
    if E::from_str(value, false).is_ok() {
        return Ok(());
    }
    let expected = E::value_variants()
        .iter()
        .filter_map(|v| v.to_possible_value())
        .map(|v| v.get_name().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(OptionError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        expected,
    })
}

/// Parse the arguments that follow the program name.
pub fn parse_args<I, S>(args: I) -> Result<ParseOutcome, OptionError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let raw: Vec<String> = args.into_iter().map(Into::into).collect();

    // Flag and optional value; a repeated flag keeps its last value.
    let mut known: Vec<(String, Option<String>)> = Vec::new();
    let mut warnings = Vec::new();
    let mut device: Option<String> = None;
    let mut make_flags: Vec<String> = Vec::new();

    let mut i = 0;
    while i < raw.len() {
        let token = raw[i].as_str();
        match token {
            "--help" | "-h" => {
                return Ok(ParseOutcome::Help(Cli::command().render_help().to_string()));
            }
            "--make-flags" => {
                make_flags = raw[i + 1..]
                    .iter()
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                break;
            }
            flag if VALUE_FLAGS.contains(&flag) => {
                let Some(value) = raw.get(i + 1) else {
                    return Err(OptionError::MissingValue(flag.to_string()));
                };
                match flag {
                    "--ksu" => check_value::<KsuVariant>(flag, value)?,
                    "--additional" => check_value::<Addon>(flag, value)?,
                    _ => check_value::<TargetSystem>(flag, value)?,
                }
                known.retain(|(f, _)| f != flag);
                known.push((flag.to_string(), Some(value.clone())));
                i += 2;
                continue;
            }
            flag if SWITCH_FLAGS.contains(&flag) => {
                known.retain(|(f, _)| f != flag);
                known.push((flag.to_string(), None));
            }
            flag if flag.starts_with('-') => {
                warnings.push(format!("Unknown option '{}', ignoring", flag));
            }
            positional if device.is_none() => device = Some(positional.to_string()),
            positional => {
                warnings.push(format!("Unexpected argument '{}', ignoring", positional));
            }
        }
        i += 1;
    }

    let device = device.ok_or(OptionError::MissingDevice)?;

    let mut clap_args = vec!["akbuild".to_string(), device];
    for (flag, value) in known {
        clap_args.push(flag);
        clap_args.extend(value);
    }
    let cli = Cli::try_parse_from(clap_args).map_err(|e| OptionError::Usage(e.to_string()))?;

    let config = BuildConfig {
        device: cli.device.unwrap_or_default(),
        ksu: cli.ksu.unwrap_or(KsuVariant::None),
        addon: cli.additional.unwrap_or(Addon::None),
        system: cli.system,
        ccache: !cli.noccache,
        skip_clean: cli.noclean,
        extra_make_args: make_flags,
    };
    config.validate()?;

    let features = config.features();
    if !features.kernelsu && (features.susfs || features.kpm) {
        warnings.push(format!(
            "--additional {} has no effect without KernelSU",
            config.addon.to_possible_value().map(|v| v.get_name().to_string()).unwrap_or_default()
        ));
    }

    Ok(ParseOutcome::Build { config, warnings })
}
