//! migrate command - Copy every object under a prefix from one bucket to another
//!
//! Objects already present in the destination are skipped, so an interrupted
//! run can simply be started again.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use humansize::{BINARY, format_size};
use s3migrate_core::{
    CallPolicy, DEFAULT_CONCURRENCY, DEFAULT_QUEUE_CAPACITY, Error, MigrationPlan, Migrator,
    RetryBuilder, RunOutcome, Side, StoreConfig, VCAP_SERVICES,
};
use s3migrate_s3::S3Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Copy objects from the source bucket to the destination bucket
#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    /// Delete every object and version in the destination before copying
    #[arg(long)]
    pub clear: bool,

    /// Number of parallel copy workers
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_positive_usize)]
    pub concurrency: usize,

    /// Maximum number of listed objects waiting for a worker
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_parser = parse_positive_usize)]
    pub queue_capacity: usize,

    /// Source prefix to copy (overrides SRC_PREFIX)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Read source credentials from the default AWS chain (EC2 instance metadata)
    #[arg(long)]
    pub use_ec2: bool,

    /// Name of the bound s3 service to copy from
    #[arg(long, value_name = "NAME")]
    pub src_service_name: Option<String>,

    /// Name of the bound s3 service to copy to
    #[arg(long, value_name = "NAME")]
    pub dest_service_name: Option<String>,

    /// Attempts per store call before giving up
    #[arg(long, default_value = "3", value_parser = parse_positive_u32)]
    pub max_attempts: u32,

    /// Deadline for a single store call in seconds (0 disables)
    #[arg(long, default_value = "60")]
    pub timeout_secs: u64,

    /// Deadline for one attempt at copying a single object, in seconds
    #[arg(long)]
    pub transfer_timeout_secs: Option<u64>,
}

/// Everything a run needs, resolved before any network call
#[derive(Debug)]
pub struct Resolved {
    pub source: StoreConfig,
    pub destination: StoreConfig,
    pub plan: MigrationPlan,
}

#[derive(Debug, Serialize)]
struct MigrateOutput<'a> {
    source: &'a str,
    destination: &'a str,
    prefix: &'a str,
    #[serde(flatten)]
    outcome: &'a RunOutcome,
}

/// Execute the migrate command
pub async fn execute(args: MigrateArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let Resolved {
        source,
        destination,
        plan,
    } = match resolve(&args, |name| std::env::var(name).ok()) {
        Ok(resolved) => resolved,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return exit_code_for(&e);
        }
    };

    let source_client = match S3Client::new(&source).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to create source client: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let destination_client = match S3Client::new(&destination).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to create destination client: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    tracing::info!(
        source = %plan.source_bucket,
        destination = %plan.destination_bucket,
        prefix = %plan.prefix,
        concurrency = plan.concurrency,
        clear = plan.clear,
        "Starting migration"
    );

    let source_bucket = plan.source_bucket.clone();
    let destination_bucket = plan.destination_bucket.clone();
    let prefix = plan.prefix.clone();

    let mut migrator = Migrator::new(
        Arc::new(source_client),
        Arc::new(destination_client),
        plan,
    );

    watch_interrupt(migrator.shutdown_token());

    let outcome = match migrator.run().await {
        Ok(outcome) => outcome,
        Err(Error::Interrupted(_)) => {
            formatter.error("Interrupted; transfers in progress were completed");
            return ExitCode::Interrupted;
        }
        Err(e) => {
            formatter.error(&format!("Migration aborted: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    if formatter.is_json() {
        formatter.json(&MigrateOutput {
            source: &source_bucket,
            destination: &destination_bucket,
            prefix: &prefix,
            outcome: &outcome,
        });
    } else {
        print_summary(&formatter, &source_bucket, &destination_bucket, &outcome);
    }

    if outcome.is_success() {
        ExitCode::Success
    } else {
        ExitCode::GeneralError
    }
}

/// First Ctrl-C stops the run gracefully, a second one exits immediately
fn watch_interrupt(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupt received, waiting for transfers in progress (Ctrl-C again to abort)");
        shutdown.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(ExitCode::Interrupted.as_i32());
        }
    });
}

fn print_summary(formatter: &Formatter, source: &str, destination: &str, outcome: &RunOutcome) {
    if let Some(cleared) = &outcome.cleared {
        formatter.println(&format!(
            "Cleared {}: {} versions, {} objects",
            formatter.style_name(destination),
            cleared.versions_deleted,
            cleared.objects_deleted
        ));
    }

    for key in &outcome.failed {
        formatter.warning(&format!("Failed: {key}"));
    }
    if outcome.panicked > 0 {
        formatter.warning(&format!(
            "{} copy worker(s) died; their counts are missing",
            outcome.panicked
        ));
    }

    let size = formatter.style_size(&format_size(outcome.bytes_copied, BINARY));
    let line = format!(
        "{} -> {}: {} listed, {} copied ({size}), {} skipped, {} failed",
        formatter.style_name(source),
        formatter.style_name(destination),
        outcome.listed,
        outcome.copied,
        outcome.skipped,
        outcome.failed_count()
    );
    if outcome.is_success() {
        formatter.success(&line);
    } else {
        formatter.println(&line);
    }
}

/// Turn arguments plus environment into store configs and a plan
pub fn resolve<F>(args: &MigrateArgs, lookup: F) -> anyhow::Result<Resolved>
where
    F: Fn(&str) -> Option<String>,
{
    let (source, env_prefix) = resolve_side(Side::Source, args.src_service_name.as_deref(), &lookup)
        .context("Cannot resolve the source bucket")?;
    let source = if args.use_ec2 {
        source.with_default_chain()
    } else {
        source
    };

    let (destination, _) =
        resolve_side(Side::Destination, args.dest_service_name.as_deref(), &lookup)
            .context("Cannot resolve the destination bucket")?;

    let prefix = args
        .prefix
        .clone()
        .filter(|p| !p.is_empty())
        .or(env_prefix)
        .unwrap_or_default();

    let retry = RetryBuilder::new().max_attempts(args.max_attempts).build();
    let call_timeout = (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs));

    let mut plan = MigrationPlan::new(source.bucket.clone(), destination.bucket.clone());
    plan.prefix = prefix;
    plan.concurrency = args.concurrency;
    plan.queue_capacity = args.queue_capacity;
    plan.clear = args.clear;
    plan.policy = CallPolicy::new(retry, call_timeout);
    plan.transfer_timeout = args.transfer_timeout_secs.map(Duration::from_secs);
    plan.validate()?;

    Ok(Resolved {
        source,
        destination,
        plan,
    })
}

fn resolve_side<F>(
    side: Side,
    service_name: Option<&str>,
    lookup: &F,
) -> s3migrate_core::Result<(StoreConfig, Option<String>)>
where
    F: Fn(&str) -> Option<String>,
{
    match service_name {
        Some(name) => {
            let doc = lookup(VCAP_SERVICES).ok_or_else(|| {
                Error::Config(format!(
                    "service '{name}' requested but {VCAP_SERVICES} is not set"
                ))
            })?;
            let config = StoreConfig::from_service_binding(&doc, name)?;
            Ok((config, None))
        }
        None => StoreConfig::from_lookup(side, lookup),
    }
}

fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    error
        .downcast_ref::<Error>()
        .map(ExitCode::from_error)
        .unwrap_or(ExitCode::UsageError)
}

fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value < 1 {
        return Err(format!("{value} is not in 1.."));
    }
    Ok(value)
}

fn parse_positive_u32(s: &str) -> Result<u32, String> {
    let value: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value < 1 {
        return Err(format!("{value} is not in 1.."));
    }
    Ok(value)
}
