use crate::{Credential, Result};
use bytes::Bytes;

mod cos;

pub use cos::{CosFactory, CosObjectStore};

/// The handful of object storage operations a verification run performs.
///
/// IBM COS speaks the S3 API, and [`CosObjectStore`] is the only real implementation.  The
/// abstraction exists so the run itself can be exercised against test doubles that model
/// per-credential permissions.
#[async_trait::async_trait]
pub trait ObjectStore: std::fmt::Debug + Sync + Send + 'static {
    /// Names of all buckets visible to this credential
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Upload a small object in a single request, returning the ETag if the service sent one
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<Option<String>>;

    /// Read an entire object into memory
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Delete an object.
    ///
    /// A refusal with the `AccessDenied` error code is reported as
    /// [`DeleteOutcome::AccessDenied`] rather than as an error; every other failure is an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<DeleteOutcome>;
}

/// What happened when an object delete was attempted
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum DeleteOutcome {
    Deleted,
    AccessDenied,
}

/// The S3 error code the service returns when a credential lacks a permission
pub(crate) const ACCESS_DENIED_CODE: &str = "AccessDenied";

/// Constructs an [`ObjectStore`] that authenticates as a given credential
#[async_trait::async_trait]
pub trait ObjectStoreFactory: std::fmt::Debug + Sync + Send + 'static {
    async fn connect(
        &self,
        credential: &Credential,
        service_instance_id: &str,
    ) -> Result<Box<dyn ObjectStore>>;
}
