//! s3migrate CLI
//!
//! Copies every object under a prefix from one S3 bucket to another, skipping
//! keys the destination already has.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_code;
mod output;

use commands::migrate::{self, MigrateArgs};
use exit_code::ExitCode;
use output::OutputConfig;

/// Migrate objects between S3 buckets
///
/// Buckets and credentials come from SRC_* / DEST_* environment variables
/// (SRC_BUCKET_NAME, SRC_ACCESS_KEY_ID, SRC_SECRET_ACCESS_KEY, SRC_REGION,
/// SRC_PREFIX, SRC_ENDPOINT) or from a bound service in VCAP_SERVICES.
#[derive(Parser, Debug)]
#[command(name = "s3migrate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,

    #[command(flatten)]
    migrate: MigrateArgs,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    init_logging(cli.debug);

    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };

    let code: ExitCode = migrate::execute(cli.migrate, output_config).await;
    code.into()
}

/// Log to stderr so stdout only carries the summary
///
/// `RUST_LOG` takes precedence over `--debug`.
fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn default_directives(debug: bool) -> &'static str {
    if debug {
        "warn,s3migrate=debug,s3migrate_core=debug,s3migrate_s3=debug"
    } else {
        "warn,s3migrate=info,s3migrate_core=info,s3migrate_s3=info"
    }
}
