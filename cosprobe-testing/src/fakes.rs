//! Test doubles for the two external systems a run talks to.
//!
//! [`FakeTerraform`] pretends to be the `terraform` CLI and remembers every command it was asked
//! to run.  [`FakeCos`] is an in-memory object store that enforces a per-role permission policy,
//! which is the one thing minio can't easily model.
use aws_sdk_s3::error::SdkError;
use bytes::Bytes;
use cosprobe::{
    CosProbeError, Credential, DeleteOutcome, ObjectStore, ObjectStoreFactory, Role,
    TerraformRunner,
};
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, Mutex},
    thread::ThreadId,
};

/// Stand-in for the `terraform` CLI
#[derive(Debug, Default)]
pub struct FakeTerraform {
    outputs: HashMap<String, String>,
    fail_on: Option<String>,
    commands: Mutex<Vec<Vec<String>>>,
    threads: Mutex<Vec<ThreadId>>,
}

impl FakeTerraform {
    /// A module which applies cleanly and declares these string outputs
    pub fn with_outputs(outputs: &[(&str, &str)]) -> Self {
        Self {
            outputs: outputs
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    /// Make the given subcommand (`init`, `apply`, ...) exit non-zero
    pub fn failing_on(mut self, subcommand: &str) -> Self {
        self.fail_on = Some(subcommand.to_string());
        self
    }

    /// Every command run so far, without the leading `terraform`
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    /// Just the subcommand of each command run so far
    pub fn subcommands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|args| args.into_iter().next())
            .collect()
    }

    /// The thread each command ran on, in the same order as [`Self::commands`]
    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().clone()
    }

    pub fn count(&self, subcommand: &str) -> usize {
        self.subcommands()
            .iter()
            .filter(|s| s.as_str() == subcommand)
            .count()
    }
}

impl TerraformRunner for FakeTerraform {
    fn run(&self, dir: &Path, args: &[String]) -> cosprobe::Result<String> {
        self.commands.lock().unwrap().push(args.to_vec());
        self.threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());

        let subcommand = args.first().cloned().unwrap_or_default();

        let failure = |stderr: String| CosProbeError::TerraformCommand {
            subcommand: subcommand.clone(),
            dir: dir.to_path_buf(),
            status: 1,
            stderr,
        };

        if self.fail_on.as_deref() == Some(subcommand.as_str()) {
            return Err(failure(format!("Error: {subcommand} failed")));
        }

        if subcommand == "output" {
            let name = args.last().cloned().unwrap_or_default();

            return match self.outputs.get(&name) {
                Some(value) => Ok(serde_json::Value::String(value.clone()).to_string()),
                None => Err(failure(format!(
                    "Error: Output \"{name}\" not found\n\nThe output variable requested could not be found in the state file."
                ))),
            };
        }

        Ok(String::new())
    }
}

/// What a credential is allowed to do in [`FakeCos`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permissions {
    pub list: bool,
    pub write: bool,
    pub read: bool,
    pub delete: bool,
}

impl Permissions {
    pub const ALL: Self = Self {
        list: true,
        write: true,
        read: true,
        delete: true,
    };

    /// COS "Object Writer"
    pub const OBJECT_WRITER: Self = Self {
        list: false,
        write: true,
        read: false,
        delete: false,
    };

    /// COS "Object Reader"
    pub const OBJECT_READER: Self = Self {
        list: false,
        write: false,
        read: true,
        delete: false,
    };
}

#[derive(Debug, Default)]
struct FakeCosState {
    buckets: BTreeMap<String, HashMap<String, Bytes>>,
    connections: Vec<(Role, String)>,
}

/// In-memory object store that hands out a differently-permissioned store per role
#[derive(Debug)]
pub struct FakeCos {
    state: Arc<Mutex<FakeCosState>>,
    policy: HashMap<Role, Permissions>,
    send_etag: bool,
}

impl FakeCos {
    /// A store containing the given empty buckets, with the policy the Terraform module is
    /// supposed to produce
    pub fn new(buckets: &[&str]) -> Self {
        let state = FakeCosState {
            buckets: buckets
                .iter()
                .map(|bucket| (bucket.to_string(), HashMap::new()))
                .collect(),
            ..Default::default()
        };

        Self {
            state: Arc::new(Mutex::new(state)),
            policy: HashMap::from([
                (Role::Writer, Permissions::OBJECT_WRITER),
                (Role::Reader, Permissions::OBJECT_READER),
                (Role::Provisioning, Permissions::ALL),
            ]),
            send_etag: true,
        }
    }

    pub fn with_permissions(mut self, role: Role, permissions: Permissions) -> Self {
        self.policy.insert(role, permissions);
        self
    }

    /// Respond to uploads without an ETag, like a misbehaving gateway would
    pub fn without_etags(mut self) -> Self {
        self.send_etag = false;
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().unwrap();

        state.buckets.get(bucket)?.get(key).cloned()
    }

    /// Roles connected so far, in order, along with the service instance ID they asked for
    pub fn connections(&self) -> Vec<(Role, String)> {
        self.state.lock().unwrap().connections.clone()
    }
}

#[async_trait::async_trait]
impl ObjectStoreFactory for FakeCos {
    async fn connect(
        &self,
        credential: &Credential,
        service_instance_id: &str,
    ) -> cosprobe::Result<Box<dyn ObjectStore>> {
        self.state
            .lock()
            .unwrap()
            .connections
            .push((credential.role, service_instance_id.to_string()));

        Ok(Box::new(FakeCosStore {
            state: self.state.clone(),
            permissions: self.policy[&credential.role],
            send_etag: self.send_etag,
        }))
    }
}

#[derive(Debug)]
struct FakeCosStore {
    state: Arc<Mutex<FakeCosState>>,
    permissions: Permissions,
    send_etag: bool,
}

/// Errors the SDK would surface.  The fake has no HTTP response to attach, so they're reported
/// as construction failures carrying the S3 error code.
fn sdk_error<E>(code: &'static str) -> SdkError<E> {
    SdkError::construction_failure(code)
}

#[async_trait::async_trait]
impl ObjectStore for FakeCosStore {
    async fn list_buckets(&self) -> cosprobe::Result<Vec<String>> {
        if !self.permissions.list {
            return Err(CosProbeError::ListBuckets {
                source: sdk_error("AccessDenied"),
            });
        }

        Ok(self.state.lock().unwrap().buckets.keys().cloned().collect())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> cosprobe::Result<Option<String>> {
        let error = |code| CosProbeError::PutObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: sdk_error(code),
        };

        if !self.permissions.write {
            return Err(error("AccessDenied"));
        }

        let mut state = self.state.lock().unwrap();
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| error("NoSuchBucket"))?;

        let e_tag = format!("\"fake-{}\"", data.len());
        objects.insert(key.to_string(), data);

        Ok(self.send_etag.then_some(e_tag))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> cosprobe::Result<Bytes> {
        let error = |code| CosProbeError::GetObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: sdk_error(code),
        };

        if !self.permissions.read {
            return Err(error("AccessDenied"));
        }

        let state = self.state.lock().unwrap();
        let objects = state.buckets.get(bucket).ok_or_else(|| error("NoSuchBucket"))?;

        objects.get(key).cloned().ok_or_else(|| error("NoSuchKey"))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> cosprobe::Result<DeleteOutcome> {
        if !self.permissions.delete {
            return Ok(DeleteOutcome::AccessDenied);
        }

        let mut state = self.state.lock().unwrap();
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CosProbeError::DeleteObject {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: sdk_error("NoSuchBucket"),
            })?;

        // Like S3, deleting a key that isn't there still succeeds
        objects.remove(key);

        Ok(DeleteOutcome::Deleted)
    }
}
