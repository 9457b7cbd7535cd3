//! Ephemeral minio servers standing in for COS.
//!
//! COS speaks the S3 API, so the storage calls `cosprobe` makes can be exercised end to end
//! against a local minio process without any IBM Cloud account.  Minio has no notion of IAM bearer
//! tokens, so clients here use minio's root access keys instead.
use crate::Result;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use color_eyre::eyre::eyre;
use cosprobe::CosObjectStore;
use duct::Handle;
use once_cell::sync::Lazy;
use rand::prelude::*;
use regex::Regex;
use std::{
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::debug;
use which::which;

const ROOT_USER: &str = "minioadmin";
const ROOT_PASSWORD: &str = "minioadmin";

pub struct MinioServer {
    #[allow(dead_code)] // Only held so the data dir outlives the server
    data_dir: TempDir,
    handle: Handle,
    endpoint: SocketAddr,
}

impl MinioServer {
    /// Share one server between all tests in the process that are alive at the same time,
    /// starting it if needed.
    ///
    /// Tests that need to see exactly which buckets exist should use [`Self::start`] for a
    /// private server instead.
    pub async fn get() -> Result<Arc<Self>> {
        // tokio Mutex since the lock is held while the server starts
        static SHARED: Lazy<Mutex<Weak<MinioServer>>> = Lazy::new(|| Mutex::new(Weak::new()));

        let mut shared = SHARED.lock().await;

        let server = match shared.upgrade() {
            Some(server) => server,
            None => {
                let server = Arc::new(Self::start().await?);
                *shared = Arc::downgrade(&server);

                server
            }
        };

        debug!(endpoint = %server.endpoint, "Using shared minio server");

        server.wait_for_service_start().await?;

        Ok(server)
    }

    /// Start a private minio server on a random free port.
    ///
    /// The binary is taken from the `MINIO_PATH` env var if set, otherwise from `PATH`.
    pub async fn start() -> Result<Self> {
        let path = Self::find_minio()?;
        let endpoint = Self::random_endpoint()?;
        let data_dir = Self::data_dir()?;

        let handle = duct::cmd!(
            path,
            "server",
            data_dir.path(),
            "--address",
            endpoint.to_string(),
            "--quiet"
        )
        .env("MINIO_ROOT_USER", ROOT_USER)
        .env("MINIO_ROOT_PASSWORD", ROOT_PASSWORD)
        .stdout_null()
        .start()?;

        let server = Self {
            data_dir,
            handle,
            endpoint,
        };

        debug!(endpoint = %server.endpoint, "Waiting for minio to accept requests");

        server.wait_for_service_start().await?;

        debug!(endpoint = %server.endpoint, "Minio started");

        Ok(server)
    }

    /// The S3 API endpoint URL where the server is listening
    pub fn endpoint_url(&self) -> url::Url {
        format!("http://{}/", self.endpoint)
            .parse()
            .expect("BUG: socket address is a valid URL host")
    }

    /// Raw SDK client authenticated as the minio root user
    pub async fn s3_client(&self) -> Result<aws_sdk_s3::Client> {
        let aws_config = aws_config::from_env()
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::from_keys(ROOT_USER, ROOT_PASSWORD, None))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(self.endpoint_url().as_str())
            .force_path_style(true)
            .build();

        Ok(aws_sdk_s3::Client::from_conf(s3_config))
    }

    /// [`CosObjectStore`] talking to this server as the root user
    pub async fn object_store(&self) -> Result<CosObjectStore> {
        Ok(CosObjectStore::from_client(self.s3_client().await?))
    }

    /// Make a new bucket whose name starts with a random prefix, so tests sharing a server
    /// don't collide.  Returns the actual bucket name.
    pub async fn create_bucket(&self, name: impl AsRef<str>) -> Result<String> {
        // Letters, digits, `.` and `-` only, and at most 63 characters
        static INVALID: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"[^0-9a-z\.\-]+").expect("BUG: invalid regex"));

        let name = name.as_ref().to_lowercase();
        let name = INVALID.replace_all(&name, "-");
        let name = &name[..name.len().min(63 - 9)];
        let bucket = format!("{:08x}-{name}", rand::thread_rng().next_u32());

        debug!(%bucket, "Creating bucket");

        let client = self.s3_client().await?;
        client.create_bucket().bucket(&bucket).send().await?;

        // Bucket creation can lag behind the API call returning, wait until it's usable
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        if let Err(e) = policy
            .retry(|| client.head_bucket().bucket(&bucket).send())
            .await
        {
            return Err(eyre!(
                "Bucket {bucket} is not accessible even after it was created.  Last error was:\n{e}"
            ));
        }

        Ok(bucket)
    }

    /// Block until `ListBuckets` succeeds or we give up
    async fn wait_for_service_start(&self) -> Result<()> {
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        let client = self.s3_client().await?;

        policy
            .retry(|| client.list_buckets().send())
            .await
            .map(|_| ())
            .map_err(|e| {
                eyre!("minio didn't come online in time.  Last ListBuckets error was:\n{e}")
            })
    }

    fn find_minio() -> Result<PathBuf> {
        std::env::var_os("MINIO_PATH")
            .map(PathBuf::from)
            .or_else(|| which("minio").ok())
            .ok_or_else(|| {
                eyre!("Unable to find `minio`, either set the MINIO_PATH env var or place the minio executable in your PATH")
            })
    }

    /// Find a free port on localhost
    fn random_endpoint() -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        Ok(addr)
    }

    /// Minio refuses data dirs on `tmpfs` (it wants `O_DIRECT`), which rules out `/tmp` on most
    /// Linux systems, so the data dir goes under the home directory
    fn data_dir() -> Result<TempDir> {
        let home = dirs::home_dir().ok_or_else(|| eyre!("Unable to determine home directory"))?;

        Ok(tempfile::tempdir_in(home)?)
    }
}

impl Drop for MinioServer {
    fn drop(&mut self) {
        debug!(pids = ?self.handle.pids(), "Killing minio");

        if let Err(e) = self.handle.kill() {
            eprintln!("Error killing minio process: {}", e);
        }
    }
}
