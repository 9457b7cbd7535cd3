use crate::CosProbeError;
use std::{path::PathBuf, str::FromStr};
use url::Url;

pub(crate) const DEFAULT_TERRAFORM_DIR: &str = "infra/cos";
pub(crate) const DEFAULT_COS_ENDPOINT: &str = "https://s3.eu-gb.cloud-object-storage.appdomain.cloud";
pub(crate) const DEFAULT_IAM_ENDPOINT: &str = "https://iam.cloud.ibm.com/identity/token";
pub(crate) const DEFAULT_REGION: &str = "us-standard";
pub(crate) const DEFAULT_OBJECT_KEY: &str = "testKey1";
pub(crate) const DEFAULT_OBJECT_CONTENT: &str = "some testing random text";

/// The configuration settings that control a verification run.
///
/// The defaults describe the `eu-gb` regional COS endpoint and the public IBM Cloud IAM token
/// service, which is what the bundled Terraform module provisions against.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// Directory containing the Terraform module to provision
    #[cfg_attr(
        feature = "clap",
        clap(long, default_value = DEFAULT_TERRAFORM_DIR, global = true, value_name = "DIR")
    )]
    pub terraform_dir: PathBuf,

    /// Terraform input variable passed to apply and destroy, may be repeated
    #[cfg_attr(
        feature = "clap",
        clap(long = "var", global = true, value_name = "KEY=VALUE")
    )]
    pub terraform_vars: Vec<TerraformVar>,

    /// The regional COS S3 API endpoint.
    ///
    /// Requests always use path-style addressing against this endpoint.
    #[cfg_attr(
        feature = "clap",
        clap(long, default_value = DEFAULT_COS_ENDPOINT, global = true, value_name = "URL")
    )]
    pub cos_endpoint: Url,

    /// The IAM endpoint which exchanges API keys for bearer tokens
    #[cfg_attr(
        feature = "clap",
        clap(long, default_value = DEFAULT_IAM_ENDPOINT, global = true, value_name = "URL")
    )]
    pub iam_endpoint: Url,

    /// Signing region reported to the S3 client.
    ///
    /// COS ignores this for bearer-token authenticated requests, but the SDK insists on one.
    #[cfg_attr(feature = "clap", clap(long, default_value = DEFAULT_REGION, global = true))]
    pub region: String,

    /// Key of the object written, read and deleted during the run
    #[cfg_attr(feature = "clap", clap(long, default_value = DEFAULT_OBJECT_KEY, global = true))]
    pub object_key: String,

    /// Contents of the object written during the run
    #[cfg_attr(
        feature = "clap",
        clap(long, default_value = DEFAULT_OBJECT_CONTENT, global = true)
    )]
    pub object_content: String,
}

impl Default for Config {
    fn default() -> Self {
        // XXX: Duplicated here and in the `clap` attributes, because the lib crate only takes a
        // clap dependency when the feature is on
        Self {
            terraform_dir: PathBuf::from(DEFAULT_TERRAFORM_DIR),
            terraform_vars: Vec::new(),
            cos_endpoint: DEFAULT_COS_ENDPOINT
                .parse()
                .expect("BUG: default COS endpoint is a valid URL"),
            iam_endpoint: DEFAULT_IAM_ENDPOINT
                .parse()
                .expect("BUG: default IAM endpoint is a valid URL"),
            region: DEFAULT_REGION.to_string(),
            object_key: DEFAULT_OBJECT_KEY.to_string(),
            object_content: DEFAULT_OBJECT_CONTENT.to_string(),
        }
    }
}

/// A single `KEY=VALUE` Terraform input variable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerraformVar {
    pub key: String,
    pub value: String,
}

impl FromStr for TerraformVar {
    type Err = CosProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok(Self {
                key: key.trim().to_string(),
                value: value.to_string(),
            }),
            _ => crate::error::InvalidTerraformVarSnafu { var: s }.fail(),
        }
    }
}

impl std::fmt::Display for TerraformVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}
