//! End-to-end runs of [`cosprobe::Scenario`] with Terraform and COS replaced by the test doubles
//! in `cosprobe_testing::fakes`.
//!
//! These pin down the run's ordering, its handling of expected and unexpected failures, and the
//! guarantee that teardown happens exactly once.
use crate::Result;
use assert_matches::assert_matches;
use cosprobe::{
    Check, Config, CosProbeError, Credential, Role, Scenario, ScenarioReport,
};
use cosprobe_testing::fakes::{FakeCos, FakeTerraform, Permissions};
use cosprobe_testing::logging::test_with_logging;
use std::sync::Arc;

const BUCKET: &str = "cos-example-bucket";
const INSTANCE_ID: &str = "crn:v1:bluemix:public:cloud-object-storage:global:a/123::";

fn outputs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("key_object_writer", "writer-api-key"),
        ("key_reader", "reader-api-key"),
        ("service_instance_id", INSTANCE_ID),
        ("bucket_name", BUCKET),
    ]
}

fn provisioning() -> Credential {
    Credential::new(Role::Provisioning, "provisioning-api-key")
}

async fn run(
    terraform: &Arc<FakeTerraform>,
    cos: &FakeCos,
) -> cosprobe::Result<ScenarioReport> {
    Scenario::new(Config::default())
        .run(terraform.clone(), cos, &provisioning())
        .await
}

fn failed_checks(report: &ScenarioReport) -> Vec<(Check, Role)> {
    report
        .failures()
        .map(|assertion| (assertion.check, assertion.role))
        .collect()
}

#[test]
fn correctly_permissioned_module_passes() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]);

        let report = run(&terraform, &cos).await?;

        assert!(report.is_success(), "{report}");
        assert_eq!(
            report
                .assertions
                .iter()
                .map(|assertion| (assertion.check, assertion.role))
                .collect::<Vec<_>>(),
            vec![
                (Check::BucketCount, Role::Provisioning),
                (Check::BucketName, Role::Provisioning),
                (Check::UploadEtag, Role::Writer),
                (Check::ReadBack, Role::Reader),
                (Check::Delete, Role::Writer),
                (Check::Delete, Role::Reader),
                (Check::Delete, Role::Provisioning),
            ]
        );

        // The provisioning key cleaned up after itself
        assert_eq!(cos.object(BUCKET, "testKey1"), None);

        assert_eq!(
            terraform.subcommands(),
            vec!["init", "apply", "output", "output", "output", "output", "destroy"]
        );

        Ok(())
    })
}

/// `test_with_logging` polls the run on the test's own thread, so any command that ran there
/// would have stalled the runtime for as long as `terraform` took
#[test]
fn terraform_runs_on_blocking_threads() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]);

        run(&terraform, &cos).await?;

        let async_thread = std::thread::current().id();
        let threads = terraform.threads();

        assert_eq!(threads.len(), terraform.commands().len());
        assert!(
            threads.iter().all(|thread| *thread != async_thread),
            "terraform ran on the async thread: {:?}",
            terraform.subcommands()
        );

        Ok(())
    })
}

#[test]
fn failed_apply_is_torn_down_on_a_blocking_thread() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()).failing_on("apply"));
        let cos = FakeCos::new(&[BUCKET]);

        assert!(run(&terraform, &cos).await.is_err());

        assert_eq!(terraform.subcommands(), vec!["init", "apply", "destroy"]);
        assert!(!terraform.threads().contains(&std::thread::current().id()));

        Ok(())
    })
}

#[test]
fn connects_each_role_to_the_provisioned_instance() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]);

        run(&terraform, &cos).await?;

        let roles = cos
            .connections()
            .into_iter()
            .map(|(role, instance_id)| {
                assert_eq!(instance_id, INSTANCE_ID);
                role
            })
            .collect::<Vec<_>>();

        assert_eq!(
            roles,
            vec![
                Role::Provisioning,
                Role::Writer,
                Role::Reader,
                Role::Writer,
                Role::Reader,
                Role::Provisioning
            ]
        );

        Ok(())
    })
}

/// Older versions of the module called the writer key output `key_writer`
#[test]
fn accepts_legacy_writer_output_name() -> Result<()> {
    test_with_logging(async move {
        let mut outputs = outputs();
        outputs[0].0 = "key_writer";

        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs));
        let cos = FakeCos::new(&[BUCKET]);

        let report = run(&terraform, &cos).await?;

        assert!(report.is_success(), "{report}");

        Ok(())
    })
}

#[test]
fn passes_terraform_vars_to_apply_and_destroy() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]);

        let mut config = Config::default();
        config.terraform_vars = vec!["region=eu-gb".parse()?];

        Scenario::new(config)
            .run(terraform.clone(), &cos, &provisioning())
            .await?;

        for args in terraform.commands() {
            let has_var = args.windows(2).any(|pair| pair == ["-var", "region=eu-gb"]);
            let expects_var = args[0] == "apply" || args[0] == "destroy";

            assert_eq!(has_var, expects_var, "unexpected args {args:?}");
        }

        Ok(())
    })
}

#[test]
fn missing_output_aborts_and_destroys() -> Result<()> {
    test_with_logging(async move {
        let outputs = outputs()
            .into_iter()
            .filter(|(name, _)| *name != "bucket_name")
            .collect::<Vec<_>>();

        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs));
        let cos = FakeCos::new(&[BUCKET]);

        let result = run(&terraform, &cos).await;

        assert_matches!(result, Err(CosProbeError::MissingOutput { name }) if name == "bucket_name");
        assert_eq!(terraform.count("destroy"), 1);
        assert!(cos.connections().is_empty());

        Ok(())
    })
}

#[test]
fn missing_writer_output_names_both_alternatives() -> Result<()> {
    test_with_logging(async move {
        let outputs = outputs()
            .into_iter()
            .filter(|(name, _)| *name != "key_object_writer")
            .collect::<Vec<_>>();

        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs));
        let cos = FakeCos::new(&[BUCKET]);

        let result = run(&terraform, &cos).await;

        assert_matches!(
            result,
            Err(CosProbeError::MissingAnyOutput { names }) if names == vec!["key_object_writer", "key_writer"]
        );
        assert_eq!(terraform.count("destroy"), 1);

        Ok(())
    })
}

#[test]
fn failed_apply_aborts_and_destroys() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()).failing_on("apply"));
        let cos = FakeCos::new(&[BUCKET]);

        let result = run(&terraform, &cos).await;

        assert_matches!(
            result,
            Err(CosProbeError::TerraformCommand { subcommand, .. }) if subcommand == "apply"
        );
        assert_eq!(terraform.subcommands(), vec!["init", "apply", "destroy"]);

        Ok(())
    })
}

#[test]
fn failed_init_aborts_and_destroys() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()).failing_on("init"));
        let cos = FakeCos::new(&[BUCKET]);

        assert!(run(&terraform, &cos).await.is_err());
        assert_eq!(terraform.subcommands(), vec!["init", "destroy"]);

        Ok(())
    })
}

#[test]
fn failed_destroy_fails_an_otherwise_passing_run() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()).failing_on("destroy"));
        let cos = FakeCos::new(&[BUCKET]);

        let result = run(&terraform, &cos).await;

        assert_matches!(
            result,
            Err(CosProbeError::TerraformCommand { subcommand, .. }) if subcommand == "destroy"
        );
        assert_eq!(terraform.count("destroy"), 1);

        Ok(())
    })
}

/// A writer key that can delete is exactly the misconfiguration the run exists to catch
#[test]
fn writer_with_delete_permission_fails() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]).with_permissions(
            Role::Writer,
            Permissions {
                delete: true,
                ..Permissions::OBJECT_WRITER
            },
        );

        let report = run(&terraform, &cos).await?;

        assert!(!report.is_success());
        assert_eq!(failed_checks(&report), vec![(Check::Delete, Role::Writer)]);
        assert_eq!(terraform.count("destroy"), 1);

        Ok(())
    })
}

#[test]
fn provisioning_key_without_delete_fails() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]).with_permissions(
            Role::Provisioning,
            Permissions {
                delete: false,
                ..Permissions::ALL
            },
        );

        let report = run(&terraform, &cos).await?;

        assert_eq!(
            failed_checks(&report),
            vec![(Check::Delete, Role::Provisioning)]
        );
        assert!(cos.object(BUCKET, "testKey1").is_some());

        Ok(())
    })
}

#[test]
fn extra_bucket_fails_list_checks() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        // Listed in name order, so the stray bucket comes first
        let cos = FakeCos::new(&["another-bucket", BUCKET]);

        let report = run(&terraform, &cos).await?;

        assert_eq!(
            failed_checks(&report),
            vec![
                (Check::BucketCount, Role::Provisioning),
                (Check::BucketName, Role::Provisioning)
            ]
        );

        Ok(())
    })
}

#[test]
fn wrong_bucket_name_fails() -> Result<()> {
    test_with_logging(async move {
        let mut outputs = outputs();
        outputs[3].1 = "some-other-bucket";

        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs));
        let cos = FakeCos::new(&[BUCKET]);

        // Uploading to a bucket that doesn't exist is an unexpected storage error, so the run is
        // aborted after the list checks
        let result = run(&terraform, &cos).await;

        assert_matches!(result, Err(CosProbeError::PutObject { bucket, .. }) if bucket == "some-other-bucket");
        assert_eq!(terraform.count("destroy"), 1);

        Ok(())
    })
}

#[test]
fn missing_etag_fails_upload_check() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]).without_etags();

        let report = run(&terraform, &cos).await?;

        assert_eq!(failed_checks(&report), vec![(Check::UploadEtag, Role::Writer)]);

        Ok(())
    })
}

#[test]
fn reader_without_read_permission_aborts() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]).with_permissions(
            Role::Reader,
            Permissions {
                read: false,
                ..Permissions::OBJECT_READER
            },
        );

        let result = run(&terraform, &cos).await;

        assert_matches!(result, Err(CosProbeError::GetObject { key, .. }) if key == "testKey1");
        assert_eq!(terraform.count("destroy"), 1);

        Ok(())
    })
}

#[test]
fn provisioning_key_without_list_permission_aborts() -> Result<()> {
    test_with_logging(async move {
        let terraform = Arc::new(FakeTerraform::with_outputs(&outputs()));
        let cos = FakeCos::new(&[BUCKET]).with_permissions(
            Role::Provisioning,
            Permissions {
                list: false,
                ..Permissions::ALL
            },
        );

        let result = run(&terraform, &cos).await;

        assert_matches!(result, Err(CosProbeError::ListBuckets { .. }));
        assert_eq!(terraform.count("destroy"), 1);

        Ok(())
    })
}
