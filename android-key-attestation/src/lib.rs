mod attestation;
mod config;
mod statement;
mod types;

pub use attestation::{chain::*, error::*, *};
pub use config::*;
pub use statement::*;
pub use types::*;

/// The log target used by this crate.
pub const LOG_TARGET: &str = "android_key_attestation";
