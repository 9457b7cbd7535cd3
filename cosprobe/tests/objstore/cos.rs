//! What [`cosprobe::CosObjectStore`] puts on the wire when it authenticates with an IAM token,
//! and how it interprets COS error responses.  A canned local endpoint plays the part of COS.
use crate::Result;
use assert_matches::assert_matches;
use cosprobe::{Config, CosObjectStore, CosProbeError, DeleteOutcome, IamToken, ObjectStore};
use cosprobe_testing::{
    http::{header_values, serve_once},
    logging::test_with_logging,
};

const XML: &str = "application/xml";
const BUCKET: &str = "my-bucket";
const KEY: &str = "testKey1";
const INSTANCE_ID: &str = "crn:v1:bluemix:public:cloud-object-storage:global:a/123::";

const ACCESS_DENIED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message><Resource>/my-bucket/testKey1</Resource><RequestId>4d9a8b3e</RequestId><httpStatusCode>403</httpStatusCode></Error>"#;

const NO_SUCH_BUCKET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist.</Message><Resource>/my-bucket/testKey1</Resource><RequestId>4d9a8b3f</RequestId><httpStatusCode>404</httpStatusCode></Error>"#;

const BUCKET_LIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Owner><ID>owner</ID><DisplayName>owner</DisplayName></Owner><Buckets><Bucket><Name>my-bucket</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket></Buckets></ListAllMyBucketsResult>"#;

fn token() -> IamToken {
    IamToken {
        access_token: "eyJraWQiOiJ0ZXN0In0.payload.signature".to_string(),
        token_type: "Bearer".to_string(),
        expires_in: Some(3600),
        expiration: None,
    }
}

fn store(endpoint: url::Url) -> CosObjectStore {
    let config = Config {
        cos_endpoint: endpoint,
        ..Config::default()
    };

    CosObjectStore::with_iam_token(&config, &token(), INSTANCE_ID)
}

/// The SigV4 signature is replaced, not joined, by the bearer token, and the request is scoped to
/// the service instance
fn assert_iam_authenticated(request: &str) {
    assert_eq!(
        header_values(request, "authorization"),
        vec![token().authorization()],
        "{request}"
    );
    assert!(!request.contains("AWS4-HMAC-SHA256"), "{request}");
    assert_eq!(
        header_values(request, "ibm-service-instance-id"),
        vec![INSTANCE_ID],
        "{request}"
    );
}

#[test]
fn delete_refused_with_access_denied_is_an_outcome() -> Result<()> {
    test_with_logging(async move {
        let (url, request) = serve_once("403 Forbidden", XML, ACCESS_DENIED).await?;

        let outcome = store(url).delete_object(BUCKET, KEY).await?;
        assert_eq!(outcome, DeleteOutcome::AccessDenied);

        let request = request.await?;
        assert!(
            request.starts_with("DELETE /my-bucket/testKey1"),
            "path-style request expected: {request}"
        );
        assert_iam_authenticated(&request);

        Ok(())
    })
}

#[test]
fn other_delete_errors_are_fatal() -> Result<()> {
    test_with_logging(async move {
        let (url, request) = serve_once("404 Not Found", XML, NO_SUCH_BUCKET).await?;

        let result = store(url).delete_object(BUCKET, KEY).await;

        assert_matches!(
            result,
            Err(CosProbeError::DeleteObject { bucket, key, .. }) if bucket == BUCKET && key == KEY
        );

        request.await?;

        Ok(())
    })
}

#[test]
fn allowed_delete_is_deleted() -> Result<()> {
    test_with_logging(async move {
        let (url, request) = serve_once("204 No Content", XML, "").await?;

        assert_eq!(
            store(url).delete_object(BUCKET, KEY).await?,
            DeleteOutcome::Deleted
        );

        assert_iam_authenticated(&request.await?);

        Ok(())
    })
}

#[test]
fn list_buckets_with_bearer_token() -> Result<()> {
    test_with_logging(async move {
        let (url, request) = serve_once("200 OK", XML, BUCKET_LIST).await?;

        let buckets = store(url).list_buckets().await?;
        assert_eq!(buckets, vec![BUCKET]);

        let request = request.await?;
        assert!(request.starts_with("GET /"), "{request}");
        assert_iam_authenticated(&request);

        Ok(())
    })
}
