//! Drives the external `terraform` CLI against a module directory.
//!
//! Nothing here understands Terraform state; the CLI does all the work and we only build its
//! command lines and read back outputs.  All commands block the calling thread until the
//! `terraform` process exits, which can take minutes for an apply or destroy.  Async code must
//! use [`TerraformWorkspace::provision_async`], [`TerraformWorkspace::with_blocking`] and
//! [`TerraformWorkspace::destroy_async`], which move that work onto tokio's blocking pool.
use crate::{config::TerraformVar, CosProbeError, Result};
use snafu::prelude::*;
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, info, instrument};
use which::which;

/// Something that can execute a `terraform` command line in a module directory.
///
/// The production implementation is [`TerraformCli`]; tests substitute their own to avoid
/// provisioning real infrastructure.
pub trait TerraformRunner: Debug + Send + Sync + 'static {
    /// Run `terraform` with `args` in `dir` and return its stdout.
    ///
    /// A non-zero exit status must be reported as [`CosProbeError::TerraformCommand`], with the
    /// process's stderr captured in the error.
    fn run(&self, dir: &Path, args: &[String]) -> Result<String>;
}

/// Runs the real `terraform` executable via `duct`
#[derive(Clone, Debug)]
pub struct TerraformCli {
    binary: PathBuf,
}

impl TerraformCli {
    /// Locate `terraform`.  The env var `TERRAFORM_PATH` is checked first, and if that's not set
    /// then it's assumed that `terraform` is in your path.
    pub fn locate() -> Result<Self> {
        let binary = match std::env::var_os("TERRAFORM_PATH") {
            Some(path) => PathBuf::from(path),
            None => which("terraform").context(crate::error::TerraformNotFoundSnafu)?,
        };

        debug!(binary = %binary.display(), "Found terraform");

        Ok(Self::with_binary(binary))
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl TerraformRunner for TerraformCli {
    fn run(&self, dir: &Path, args: &[String]) -> Result<String> {
        let subcommand = args.first().cloned().unwrap_or_default();

        debug!(dir = %dir.display(), ?args, "Running terraform");

        let output = duct::cmd(&self.binary, args)
            .dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .with_context(|_| crate::error::TerraformSpawnSnafu {
                subcommand: subcommand.clone(),
                dir: dir.to_path_buf(),
            })?;

        if !output.status.success() {
            return crate::error::TerraformCommandSnafu {
                subcommand,
                dir: dir.to_path_buf(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .fail();
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Where the module lives and which input variables it gets
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TerraformOptions {
    pub dir: PathBuf,
    pub vars: Vec<TerraformVar>,
}

impl TerraformOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            vars: Vec::new(),
        }
    }
}

/// Infrastructure provisioned from a Terraform module.
///
/// The infrastructure is destroyed exactly once: either by an explicit call to
/// [`Self::destroy`], or when this value is dropped.  That includes the case where provisioning
/// itself failed part way through, and unwinding from a panic.
#[derive(Debug)]
pub struct TerraformWorkspace {
    runner: Arc<dyn TerraformRunner>,
    options: TerraformOptions,
    destroyed: bool,
}

impl TerraformWorkspace {
    /// Run `terraform init` followed by `terraform apply`.
    ///
    /// If either fails, whatever was created is destroyed before the error is returned.
    #[instrument(skip(runner, options), fields(dir = %options.dir.display()))]
    pub fn provision(runner: Arc<dyn TerraformRunner>, options: TerraformOptions) -> Result<Self> {
        let workspace = Self {
            runner,
            options,
            destroyed: false,
        };

        info!("Initializing Terraform module");
        workspace.run(init_args())?;

        info!("Applying Terraform module");
        workspace.run(apply_args(&workspace.options.vars))?;

        info!("Terraform module applied");

        Ok(workspace)
    }

    /// [`Self::provision`] on a blocking thread
    pub async fn provision_async(
        runner: Arc<dyn TerraformRunner>,
        options: TerraformOptions,
    ) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::provision(runner, options))
            .await
            .context(crate::error::SpawnBlockingSnafu {})?
    }

    /// Run `f` against the workspace on a blocking thread, then hand the workspace back along
    /// with whatever `f` returned.
    ///
    /// If `f` panics the workspace is dropped, and so destroyed, on the blocking thread.
    pub async fn with_blocking<F, T>(self, f: F) -> Result<(Self, T)>
    where
        F: FnOnce(&Self) -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let result = f(&self);
            (self, result)
        })
        .await
        .context(crate::error::SpawnBlockingSnafu {})
    }

    /// Read a single output.  Returns `None` if the module doesn't declare it or its value is
    /// `null`.
    #[instrument(skip(self))]
    pub fn output(&self, name: &str) -> Result<Option<String>> {
        match self.run(output_args(name)) {
            Ok(stdout) => parse_output(name, &stdout),
            Err(CosProbeError::TerraformCommand { ref stderr, .. }) if is_missing_output(name, stderr) => {
                debug!("Output is not declared");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Read an output that must be set to a non-empty value
    pub fn output_required(&self, name: &str) -> Result<String> {
        match self.output(name)? {
            Some(value) if !value.is_empty() => Ok(value),
            _ => crate::error::MissingOutputSnafu { name }.fail(),
        }
    }

    /// Read the first of several alternative names for the same output that is set.
    ///
    /// Used where a module has renamed an output between versions.
    pub fn output_first_of(&self, names: &[&str]) -> Result<String> {
        for name in names {
            if let Some(value) = self.output(name)? {
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }

        crate::error::MissingAnyOutputSnafu {
            names: names.iter().map(|name| name.to_string()).collect::<Vec<_>>(),
        }
        .fail()
    }

    /// Run `terraform destroy`, consuming the workspace
    pub fn destroy(mut self) -> Result<()> {
        self.destroy_once()
    }

    /// [`Self::destroy`] on a blocking thread
    pub async fn destroy_async(self) -> Result<()> {
        tokio::task::spawn_blocking(move || self.destroy())
            .await
            .context(crate::error::SpawnBlockingSnafu {})?
    }

    fn destroy_once(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        info!(dir = %self.options.dir.display(), "Destroying Terraform module");
        self.run(destroy_args(&self.options.vars))?;
        info!(dir = %self.options.dir.display(), "Terraform module destroyed");

        Ok(())
    }

    fn run(&self, args: Vec<String>) -> Result<String> {
        self.runner.run(&self.options.dir, &args)
    }
}

/// Last resort teardown for a workspace that was never explicitly destroyed.  This blocks whatever
/// thread the workspace is dropped on, including an async worker.
impl Drop for TerraformWorkspace {
    fn drop(&mut self) {
        if let Err(e) = self.destroy_once() {
            error!(err = %e, "Error destroying Terraform module; cloud resources may have leaked");
        }
    }
}

pub(crate) fn init_args() -> Vec<String> {
    args(&["init", "-upgrade=false", "-input=false", "-no-color"])
}

pub(crate) fn apply_args(vars: &[TerraformVar]) -> Vec<String> {
    with_vars(
        args(&["apply", "-input=false", "-auto-approve", "-lock=false", "-no-color"]),
        vars,
    )
}

pub(crate) fn destroy_args(vars: &[TerraformVar]) -> Vec<String> {
    with_vars(
        args(&["destroy", "-input=false", "-auto-approve", "-lock=false", "-no-color"]),
        vars,
    )
}

pub(crate) fn output_args(name: &str) -> Vec<String> {
    args(&["output", "-no-color", "-json", name])
}

fn args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

fn with_vars(mut args: Vec<String>, vars: &[TerraformVar]) -> Vec<String> {
    for var in vars {
        args.push("-var".to_string());
        args.push(var.to_string());
    }

    args
}

/// `terraform output` exits non-zero with `Output "<name>" not found` when the module doesn't
/// declare the output, or `No outputs found` when the state has none at all.  Any other failure
/// (missing state, broken backend, provider errors) is not a missing output.
fn is_missing_output(name: &str, stderr: &str) -> bool {
    stderr.contains(&format!("Output \"{name}\" not found")) || stderr.contains("No outputs found")
}

/// Interpret the stdout of `terraform output -json <name>`.
///
/// Strings come back as-is, `null` means unset, anything else is rendered as compact JSON.
fn parse_output(name: &str, stdout: &str) -> Result<Option<String>> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())
        .with_context(|_| crate::error::MalformedOutputSnafu {
            name,
            raw: stdout.to_string(),
        })?;

    Ok(match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}
