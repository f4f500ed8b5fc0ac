//! Kernel build steps driven through `make`.

pub mod kernel;
