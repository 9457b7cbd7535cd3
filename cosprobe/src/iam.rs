//! Exchange of IBM Cloud API keys for short-lived IAM bearer tokens
use crate::Result;
use serde::Deserialize;
use snafu::prelude::*;
use tracing::{debug, instrument};
use url::Url;

const APIKEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Access token issued by the IAM token service
#[derive(Clone, Deserialize)]
pub struct IamToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the token expires, as reported by the issuer
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Expiration as a unix timestamp
    #[serde(default)]
    pub expiration: Option<u64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl IamToken {
    /// The value of the `Authorization` header for requests made with this token
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl std::fmt::Debug for IamToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamToken")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Client for the IAM token endpoint
#[derive(Clone, Debug)]
pub struct IamTokenProvider {
    endpoint: Url,
    http: reqwest::Client,
}

impl IamTokenProvider {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    /// Exchange `api_key` for a bearer token.
    ///
    /// The request is made once; a rejected key or transport failure is returned as an error.
    #[instrument(skip(self, api_key), fields(endpoint = %self.endpoint))]
    pub async fn fetch_token(&self, api_key: &str) -> Result<IamToken> {
        debug!("Requesting IAM token");

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("grant_type", APIKEY_GRANT_TYPE), ("apikey", api_key)])
            .send()
            .await
            .with_context(|_| crate::error::IamRequestSnafu {
                endpoint: self.endpoint.clone(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            return crate::error::IamRejectedSnafu {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let token: IamToken = response
            .json()
            .await
            .with_context(|_| crate::error::IamRequestSnafu {
                endpoint: self.endpoint.clone(),
            })?;

        debug!(expires_in = ?token.expires_in, "Obtained IAM token");

        Ok(token)
    }
}
