#![doc = include_str!("../README.md")]

mod config;
mod credential;
mod error;
mod iam;
mod objstore;
mod scenario;
mod terraform;

pub use config::{Config, TerraformVar};
pub use credential::{Credential, Role, PROVISIONING_API_KEY_VAR};
pub use error::{CosProbeError, Result};
pub use iam::{IamToken, IamTokenProvider};
pub use objstore::*;
pub use scenario::*;
pub use terraform::{TerraformCli, TerraformOptions, TerraformRunner, TerraformWorkspace};
