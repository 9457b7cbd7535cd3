use crate::Result;
use snafu::prelude::*;

/// The env var holding the API key Terraform provisions with
pub const PROVISIONING_API_KEY_VAR: &str = "IC_API_KEY";

/// The permission level a credential is expected to have
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    /// Service key that may write objects but not delete them
    Writer,
    /// Service key that may read objects but not delete them
    Reader,
    /// The API key used to run Terraform, which can do anything
    Provisioning,
}

/// An IBM Cloud API key together with the role it's supposed to carry.
///
/// Credentials are only ever passed through, never generated or rotated.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub role: Role,
    api_key: String,
}

impl Credential {
    pub fn new(role: Role, api_key: impl Into<String>) -> Self {
        Self {
            role,
            api_key: api_key.into(),
        }
    }

    /// Read the provisioning credential from the `IC_API_KEY` env var
    pub fn provisioning_from_env() -> Result<Self> {
        let api_key = std::env::var(PROVISIONING_API_KEY_VAR).context(
            crate::error::MissingApiKeySnafu {
                var: PROVISIONING_API_KEY_VAR,
            },
        )?;

        Ok(Self::new(Role::Provisioning, api_key))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("role", &self.role)
            .field("api_key", &"<redacted>")
            .finish()
    }
}
