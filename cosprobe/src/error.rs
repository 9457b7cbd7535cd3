use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::{
    delete_object::DeleteObjectError, get_object::GetObjectError,
    list_buckets::ListBucketsError, put_object::PutObjectError,
};
use snafu::prelude::*;
use std::path::PathBuf;

pub type Result<T, E = CosProbeError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CosProbeError {
    #[snafu(display("Unable to find `terraform`, either set the TERRAFORM_PATH env var or place the Terraform executable in your PATH"))]
    TerraformNotFound { source: which::Error },

    #[snafu(display("Error launching `terraform {subcommand}` in '{}'", dir.display()))]
    TerraformSpawn {
        subcommand: String,
        dir: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "`terraform {subcommand}` in '{}' exited with status {status}:\n{stderr}",
        dir.display()
    ))]
    TerraformCommand {
        subcommand: String,
        dir: PathBuf,
        status: i32,
        stderr: String,
    },

    #[snafu(display("A blocking Terraform task panicked or was canceled"))]
    SpawnBlocking { source: tokio::task::JoinError },

    #[snafu(display("The Terraform output '{name}' is required but was not set"))]
    MissingOutput { name: String },

    #[snafu(display("None of the Terraform outputs {names:?} is set"))]
    MissingAnyOutput { names: Vec<String> },

    #[snafu(display("The Terraform output '{name}' is not valid JSON: {raw}"))]
    MalformedOutput {
        name: String,
        raw: String,
        source: serde_json::Error,
    },

    #[snafu(display("The Terraform variable '{var}' is not of the form KEY=VALUE"))]
    InvalidTerraformVar { var: String },

    #[snafu(display("Error requesting an IAM token from '{endpoint}'"))]
    IamRequest {
        endpoint: url::Url,
        source: reqwest::Error,
    },

    #[snafu(display("IAM endpoint '{endpoint}' rejected the API key with status {status}: {body}"))]
    IamRejected {
        endpoint: url::Url,
        status: u16,
        body: String,
    },

    #[snafu(display("The provisioning API key is not set; export {var} before running"))]
    MissingApiKey {
        var: String,
        source: std::env::VarError,
    },

    #[snafu(display("Error listing buckets"))]
    ListBuckets {
        source: SdkError<ListBucketsError>,
    },

    #[snafu(display("Error uploading object '{key}' to bucket '{bucket}'"))]
    PutObject {
        bucket: String,
        key: String,
        source: SdkError<PutObjectError>,
    },

    #[snafu(display("Error reading object '{key}' from bucket '{bucket}'"))]
    GetObject {
        bucket: String,
        key: String,
        source: SdkError<GetObjectError>,
    },

    #[snafu(display("Error reading the body of object '{key}' in bucket '{bucket}'"))]
    ReadObjectBody {
        bucket: String,
        key: String,
        source: aws_smithy_types::byte_stream::error::Error,
    },

    #[snafu(display("Error deleting object '{key}' from bucket '{bucket}'"))]
    DeleteObject {
        bucket: String,
        key: String,
        source: SdkError<DeleteObjectError>,
    },
}
