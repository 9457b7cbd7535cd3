use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use cosprobe::{Config, CosFactory, Credential, Role, Scenario, TerraformCli};
use std::sync::Arc;
use tracing::info;

/// Provision an IBM Cloud Object Storage bucket with Terraform and verify the permissions of the
/// service credentials it creates
#[derive(Parser, Debug)]
#[clap(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    globals: Globals,

    #[clap(flatten)]
    config: Config,
}

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    ")"
);

/// Arguments that apply regardless of command
#[derive(Parser, Debug)]
struct Globals {
    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the module, check every credential, then destroy the module
    Run {
        /// API key with rights to provision the module and to delete objects
        #[clap(long, env = cosprobe::PROVISIONING_API_KEY_VAR, hide_env_values = true)]
        api_key: String,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    init_logging(&args.globals)?;

    match args.command {
        Command::Run { api_key } => {
            run(args.config, Credential::new(Role::Provisioning, api_key)).await
        }
    }
}

async fn run(config: Config, provisioning: Credential) -> color_eyre::Result<()> {
    let runner = Arc::new(TerraformCli::locate()?);
    let factory = CosFactory::new(config.clone());
    let scenario = Scenario::new(config);

    let report = scenario
        .run(runner, &factory, &provisioning)
        .await
        .wrap_err("Verification run aborted")?;

    print!("{report}");

    if report.is_success() {
        info!("All checks passed");
        Ok(())
    } else {
        Err(eyre!(
            "{} of {} checks failed",
            report.failures().count(),
            report.assertions.len()
        ))
    }
}

fn init_logging(globals: &Globals) -> color_eyre::Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_filter = if globals.verbose {
        "h2=warn,hyper=info,rustls=info,aws=info,reqwest=info,debug"
    } else if globals.quiet {
        "error"
    } else {
        "warn,cosprobe=info"
    };

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
