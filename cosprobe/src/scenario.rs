//! The verification run: provision the module, check what each credential can and can't do,
//! then tear it all down.
use crate::{
    objstore::{DeleteOutcome, ObjectStore, ObjectStoreFactory},
    terraform::{TerraformOptions, TerraformRunner, TerraformWorkspace},
    Config, Credential, Result, Role,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Names the writer key output has had over the life of the module, newest first
pub const WRITER_KEY_OUTPUTS: &[&str] = &["key_object_writer", "key_writer"];
pub const READER_KEY_OUTPUT: &str = "key_reader";
pub const SERVICE_INSTANCE_ID_OUTPUT: &str = "service_instance_id";
pub const BUCKET_NAME_OUTPUT: &str = "bucket_name";

/// The Terraform outputs a run depends on.  All of them are required.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionedOutputs {
    pub writer_key: String,
    pub reader_key: String,
    pub service_instance_id: String,
    pub bucket_name: String,
}

impl ProvisionedOutputs {
    pub fn read(workspace: &TerraformWorkspace) -> Result<Self> {
        Ok(Self {
            writer_key: workspace.output_first_of(WRITER_KEY_OUTPUTS)?,
            reader_key: workspace.output_required(READER_KEY_OUTPUT)?,
            service_instance_id: workspace.output_required(SERVICE_INSTANCE_ID_OUTPUT)?,
            bucket_name: workspace.output_required(BUCKET_NAME_OUTPUT)?,
        })
    }

    pub fn writer(&self) -> Credential {
        Credential::new(Role::Writer, self.writer_key.clone())
    }

    pub fn reader(&self) -> Credential {
        Credential::new(Role::Reader, self.reader_key.clone())
    }
}

impl std::fmt::Debug for ProvisionedOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedOutputs")
            .field("service_instance_id", &self.service_instance_id)
            .field("bucket_name", &self.bucket_name)
            .finish_non_exhaustive()
    }
}

/// The individual checks made during a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Check {
    /// Exactly one bucket is visible
    BucketCount,
    /// The visible bucket is the provisioned one
    BucketName,
    /// Upload produced an ETag
    UploadEtag,
    /// Object read back matches what was uploaded
    ReadBack,
    /// Delete was allowed or refused as the credential's role demands
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assertion {
    pub check: Check,
    pub role: Role,
    pub passed: bool,
    pub detail: String,
}

/// Pass/fail outcome of every check, in the order they were made
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScenarioReport {
    pub assertions: Vec<Assertion>,
}

impl ScenarioReport {
    fn record(&mut self, check: Check, role: Role, passed: bool, detail: impl Into<String>) {
        let detail = detail.into();

        if passed {
            info!(%check, %role, %detail, "Check passed");
        } else {
            warn!(%check, %role, %detail, "Check failed");
        }

        self.assertions.push(Assertion {
            check,
            role,
            passed,
            detail,
        });
    }

    pub fn is_success(&self) -> bool {
        self.assertions.iter().all(|assertion| assertion.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Assertion> {
        self.assertions.iter().filter(|assertion| !assertion.passed)
    }
}

impl std::fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for assertion in &self.assertions {
            writeln!(
                f,
                "{} {} [{}]: {}",
                if assertion.passed { "PASS" } else { "FAIL" },
                assertion.check,
                assertion.role,
                assertion.detail
            )?;
        }

        Ok(())
    }
}

/// A single end-to-end verification run.
///
/// Steps happen strictly one after another.  Check failures are recorded in the report and the
/// run carries on; any other error (Terraform, IAM, an unexpected storage API error) aborts the
/// run.  Either way the provisioned infrastructure is destroyed exactly once.
#[derive(Clone, Debug)]
pub struct Scenario {
    config: Config,
}

impl Scenario {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn terraform_options(&self) -> TerraformOptions {
        TerraformOptions {
            dir: self.config.terraform_dir.clone(),
            vars: self.config.terraform_vars.clone(),
        }
    }

    #[instrument(skip_all, fields(dir = %self.config.terraform_dir.display()))]
    pub async fn run(
        &self,
        runner: Arc<dyn TerraformRunner>,
        factory: &dyn ObjectStoreFactory,
        provisioning: &Credential,
    ) -> Result<ScenarioReport> {
        let workspace =
            TerraformWorkspace::provision_async(runner, self.terraform_options()).await?;

        let (workspace, outputs) = workspace.with_blocking(ProvisionedOutputs::read).await?;

        let result = match outputs {
            Ok(outputs) => self.exercise(&outputs, factory, provisioning).await,
            Err(e) => Err(e),
        };

        match (result, workspace.destroy_async().await) {
            (Ok(report), Ok(())) => Ok(report),
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(destroy_err)) => {
                error!(err = %destroy_err, "Destroy also failed after the run was aborted");
                Err(e)
            }
        }
    }

    async fn exercise(
        &self,
        outputs: &ProvisionedOutputs,
        factory: &dyn ObjectStoreFactory,
        provisioning: &Credential,
    ) -> Result<ScenarioReport> {
        info!(
            service_instance_id = %outputs.service_instance_id,
            bucket = %outputs.bucket_name,
            "Read Terraform outputs"
        );

        let instance_id = outputs.service_instance_id.as_str();
        let mut report = ScenarioReport::default();

        // The provisioning key proves the outputs point at a reachable instance and bucket
        let store = factory.connect(provisioning, instance_id).await?;
        self.check_list_buckets(store.as_ref(), provisioning.role, &outputs.bucket_name, &mut report)
            .await?;

        let writer = outputs.writer();
        let store = factory.connect(&writer, instance_id).await?;
        self.check_upload(store.as_ref(), writer.role, &outputs.bucket_name, &mut report)
            .await?;

        let reader = outputs.reader();
        let store = factory.connect(&reader, instance_id).await?;
        self.check_read(store.as_ref(), reader.role, &outputs.bucket_name, &mut report)
            .await?;

        // Neither service key was granted delete, only the provisioning key can clean up
        for (credential, expected) in [
            (&writer, DeleteOutcome::AccessDenied),
            (&reader, DeleteOutcome::AccessDenied),
            (provisioning, DeleteOutcome::Deleted),
        ] {
            let store = factory.connect(credential, instance_id).await?;
            self.check_delete(
                store.as_ref(),
                credential.role,
                &outputs.bucket_name,
                expected,
                &mut report,
            )
            .await?;
        }

        Ok(report)
    }

    /// Exactly one bucket is visible and it's the provisioned one
    pub async fn check_list_buckets(
        &self,
        store: &dyn ObjectStore,
        role: Role,
        bucket_name: &str,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        let buckets = store.list_buckets().await?;

        report.record(
            Check::BucketCount,
            role,
            buckets.len() == 1,
            format!("expected exactly 1 bucket, found {}", buckets.len()),
        );

        let first = buckets.first().map(|name| name.as_str());
        report.record(
            Check::BucketName,
            role,
            first == Some(bucket_name),
            format!("expected bucket '{bucket_name}', found {first:?}"),
        );

        Ok(())
    }

    pub async fn check_upload(
        &self,
        store: &dyn ObjectStore,
        role: Role,
        bucket_name: &str,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        let e_tag = store
            .put_object(
                bucket_name,
                &self.config.object_key,
                Bytes::from(self.config.object_content.clone()),
            )
            .await?;

        report.record(
            Check::UploadEtag,
            role,
            e_tag.as_deref().is_some_and(|e_tag| !e_tag.is_empty()),
            format!("expected a non-empty ETag, got {e_tag:?}"),
        );

        Ok(())
    }

    pub async fn check_read(
        &self,
        store: &dyn ObjectStore,
        role: Role,
        bucket_name: &str,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        let data = store.get_object(bucket_name, &self.config.object_key).await?;

        report.record(
            Check::ReadBack,
            role,
            data.as_ref() == self.config.object_content.as_bytes(),
            format!(
                "expected {:?}, read {:?}",
                self.config.object_content,
                String::from_utf8_lossy(&data)
            ),
        );

        Ok(())
    }

    pub async fn check_delete(
        &self,
        store: &dyn ObjectStore,
        role: Role,
        bucket_name: &str,
        expected: DeleteOutcome,
        report: &mut ScenarioReport,
    ) -> Result<()> {
        let outcome = store
            .delete_object(bucket_name, &self.config.object_key)
            .await?;

        report.record(
            Check::Delete,
            role,
            outcome == expected,
            format!("expected {expected}, got {outcome}"),
        );

        Ok(())
    }
}
