use super::{DeleteOutcome, ObjectStore, ObjectStoreFactory, ACCESS_DENIED_CODE};
use crate::{iam::IamToken, iam::IamTokenProvider, Config, Credential, Result};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{
    interceptors::BeforeTransmitInterceptorContextMut, BehaviorVersion, ConfigBag, Intercept,
    RuntimeComponents,
};
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_types::region::Region;
use bytes::Bytes;
use snafu::prelude::*;
use tracing::{debug, instrument};

/// Implementation of [`ObjectStore`] for IBM COS, or any other S3-compatible API
#[derive(Clone)]
pub struct CosObjectStore {
    client: aws_sdk_s3::Client,
}

impl CosObjectStore {
    /// Build a client that authenticates every request with an IAM bearer token on behalf of
    /// the COS service instance `service_instance_id`
    pub fn with_iam_token(config: &Config, token: &IamToken, service_instance_id: &str) -> Self {
        Self::from_client(make_cos_client(config, token, service_instance_id))
    }

    /// Wrap an already configured S3 client, such as one talking to a local minio server
    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for CosObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CosObjectStore")
    }
}

#[async_trait::async_trait]
impl ObjectStore for CosObjectStore {
    #[instrument(skip(self))]
    async fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .context(crate::error::ListBucketsSnafu)?;

        let buckets = output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name())
            .map(|name| name.to_string())
            .collect::<Vec<_>>();

        debug!(?buckets, "Listed buckets");

        Ok(buckets)
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<Option<String>> {
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|_| crate::error::PutObjectSnafu { bucket, key })?;

        let e_tag = output.e_tag().map(|e_tag| e_tag.to_string());

        debug!(?e_tag, "Uploaded object");

        Ok(e_tag)
    }

    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|_| crate::error::GetObjectSnafu { bucket, key })?;

        let data = output
            .body
            .collect()
            .await
            .with_context(|_| crate::error::ReadObjectBodySnafu { bucket, key })?
            .into_bytes();

        debug!(len = data.len(), "Read object");

        Ok(data)
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<DeleteOutcome> {
        let result = self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Deleted object");
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) if is_access_denied(e.as_service_error().and_then(|e| e.code())) => {
                debug!("Delete was refused with AccessDenied");
                Ok(DeleteOutcome::AccessDenied)
            }
            Err(e) => Err(e).with_context(|_| crate::error::DeleteObjectSnafu { bucket, key }),
        }
    }
}

fn is_access_denied(code: Option<&str>) -> bool {
    code == Some(ACCESS_DENIED_CODE)
}

/// Creates a [`CosObjectStore`] per credential by exchanging the credential's API key for an
/// IAM token
#[derive(Clone, Debug)]
pub struct CosFactory {
    config: Config,
    iam: IamTokenProvider,
}

impl CosFactory {
    pub fn new(config: Config) -> Self {
        Self {
            iam: IamTokenProvider::new(config.iam_endpoint.clone()),
            config,
        }
    }
}

#[async_trait::async_trait]
impl ObjectStoreFactory for CosFactory {
    #[instrument(skip(self), fields(role = %credential.role))]
    async fn connect(
        &self,
        credential: &Credential,
        service_instance_id: &str,
    ) -> Result<Box<dyn ObjectStore>> {
        let token = self.iam.fetch_token(credential.api_key()).await?;

        Ok(Box::new(CosObjectStore::with_iam_token(
            &self.config,
            &token,
            service_instance_id,
        )))
    }
}

/// Replaces the SigV4 signature the SDK computes with the IAM bearer token that COS expects,
/// and names the service instance the request is scoped to.
///
/// This runs after signing, so the placeholder credentials the client is built with never
/// reach the wire.
struct IamBearerAuth {
    authorization: String,
    service_instance_id: String,
}

impl std::fmt::Debug for IamBearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamBearerAuth")
            .field("service_instance_id", &self.service_instance_id)
            .finish_non_exhaustive()
    }
}

impl Intercept for IamBearerAuth {
    fn name(&self) -> &'static str {
        "IamBearerAuth"
    }

    fn modify_before_transmit(
        &self,
        context: &mut BeforeTransmitInterceptorContextMut<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let headers = context.request_mut().headers_mut();
        headers.try_insert("authorization", self.authorization.clone())?;
        headers.try_insert("ibm-service-instance-id", self.service_instance_id.clone())?;

        Ok(())
    }
}

fn make_cos_client(config: &Config, token: &IamToken, service_instance_id: &str) -> aws_sdk_s3::Client {
    let s3_config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .endpoint_url(config.cos_endpoint.as_str())
        .force_path_style(true)
        // The SDK won't send a request it can't sign, so give it something to sign with.  The
        // interceptor swaps the signature for the bearer token afterwards.
        .credentials_provider(Credentials::from_keys("cosprobe", "iam-bearer-token", None))
        .interceptor(IamBearerAuth {
            authorization: token.authorization(),
            service_instance_id: service_instance_id.to_string(),
        })
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}
