//! pco-cache-admin: inspect and invalidate the shared lookup cache
//!
//! Usage:
//!   pco-cache-admin ping                               Check the configured backend
//!   pco-cache-admin size                               Count live entries
//!   pco-cache-admin clear                              Remove every entry
//!   pco-cache-admin invalidate-op <operation>          Remove all results of an operation
//!   pco-cache-admin invalidate-prefix <prefix>         Remove keys under a prefix
//!   pco-cache-admin invalidate <operation> <args> [kwargs]
//!   pco-cache-admin apply-mutation <json>              Invalidate what a write made stale
//!   pco-cache-admin policies                           List cached operations and TTLs

use anyhow::{anyhow, bail, Context};
use pco_cache::cache::{CacheManager, CacheSettings, CallArgs, Invalidator, PrefixOutcome};
use pco_cache::catalog::{self, Mutation};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "ping" => cmd_ping().await,
        "size" => cmd_size().await,
        "clear" => cmd_clear().await,
        "invalidate-op" => cmd_invalidate_op(&args[2..]).await,
        "invalidate-prefix" => cmd_invalidate_prefix(&args[2..]).await,
        "invalidate" => cmd_invalidate(&args[2..]).await,
        "apply-mutation" => cmd_apply_mutation(&args[2..]).await,
        "policies" => {
            cmd_policies();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"pco-cache-admin: lookup cache maintenance

USAGE:
    pco-cache-admin <COMMAND> [ARGS]

COMMANDS:
    ping                                  Check that the configured backend answers
    size                                  Count live entries in the cache namespace
    clear                                 Remove every entry in the cache namespace
    invalidate-op <operation>             Remove all cached results of an operation
    invalidate-prefix <prefix>            Remove keys under a raw prefix
    invalidate <operation> <json-array> [json-object]
                                          Remove one cached call (positional args, keyword args)
    apply-mutation <json>                 Invalidate what a write made stale,
                                          e.g. '{{"kind":"person_updated","person_id":"42"}}'
    policies                              List cached operations and their TTLs
    version                               Show version information
    help                                  Show this help message

ENVIRONMENT:
    CACHE_TYPE                            memory | redis | none
    CACHE_NAMESPACE                       Key namespace shared with the services
    REDIS_URL, REDIS_HOST, REDIS_PORT, REDIS_DB, REDIS_PASSWORD
    RUST_LOG                              Log filter (e.g. pco_cache=debug)"#
    );
}

fn cmd_version() {
    println!("pco-cache-admin {}", env!("CARGO_PKG_VERSION"));
}

async fn connect() -> anyhow::Result<Arc<CacheManager>> {
    let settings = CacheSettings::from_env().context("reading cache settings")?;
    connect_with(&settings).await
}

/// Maintenance must hit the configured store; no in-process fallback here.
async fn connect_with(settings: &CacheSettings) -> anyhow::Result<Arc<CacheManager>> {
    let manager = CacheManager::from_settings_strict(settings)
        .await
        .with_context(|| format!("connecting to the {:?} cache backend", settings.backend))?;
    Ok(Arc::new(manager))
}

async fn cmd_ping() -> anyhow::Result<()> {
    let manager = connect().await?;
    manager.ping().await?;
    println!("{}: ok", manager.backend_name());
    Ok(())
}

async fn cmd_size() -> anyhow::Result<()> {
    let manager = connect().await?;
    let n = manager
        .len()
        .await
        .ok_or_else(|| anyhow!("{} backend did not answer", manager.backend_name()))?;
    println!("{n}");
    Ok(())
}

async fn cmd_clear() -> anyhow::Result<()> {
    let manager = connect().await?;
    if !Invalidator::new(Arc::clone(&manager)).invalidate_all().await {
        bail!("{} backend did not answer", manager.backend_name());
    }
    println!("cleared");
    Ok(())
}

async fn cmd_invalidate_op(args: &[String]) -> anyhow::Result<()> {
    let operation = args.first().ok_or_else(|| anyhow!("missing <operation>"))?;
    if catalog::policy(operation).is_none() {
        eprintln!("warning: '{operation}' is not a known cached operation");
    }
    let manager = connect().await?;
    report_prefix(Invalidator::new(manager).invalidate_operation(operation).await)
}

async fn cmd_invalidate_prefix(args: &[String]) -> anyhow::Result<()> {
    let prefix = args.first().ok_or_else(|| anyhow!("missing <prefix>"))?;
    let manager = connect().await?;
    report_prefix(Invalidator::new(manager).invalidate_prefix(prefix).await)
}

fn report_prefix(outcome: PrefixOutcome) -> anyhow::Result<()> {
    match outcome {
        PrefixOutcome::Removed(n) => println!("removed {n}"),
        PrefixOutcome::NamespaceCleared => println!("backend cannot enumerate keys; namespace cleared"),
        PrefixOutcome::Failed => bail!("invalidation failed; see log output"),
    }
    Ok(())
}

async fn cmd_invalidate(args: &[String]) -> anyhow::Result<()> {
    let operation = args.first().ok_or_else(|| anyhow!("missing <operation>"))?;
    let call = parse_call_args(args.get(1).map(String::as_str), args.get(2).map(String::as_str))?;
    let manager = connect().await?;
    let removed = Invalidator::new(manager).invalidate(operation, &call).await?;
    println!("{}", if removed { "removed 1" } else { "not cached" });
    Ok(())
}

fn parse_call_args(positional: Option<&str>, keyword: Option<&str>) -> anyhow::Result<CallArgs> {
    let mut call = CallArgs::new();
    if let Some(raw) = positional {
        let values: Vec<serde_json::Value> =
            serde_json::from_str(raw).context("positional arguments must be a JSON array")?;
        for v in &values {
            call.push_arg(v)?;
        }
    }
    if let Some(raw) = keyword {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).context("keyword arguments must be a JSON object")?;
        for (name, v) in &map {
            call.push_kwarg(name.as_str(), v)?;
        }
    }
    Ok(call)
}

async fn cmd_apply_mutation(args: &[String]) -> anyhow::Result<()> {
    let raw = args.first().ok_or_else(|| anyhow!("missing <json>"))?;
    let mutation: Mutation = serde_json::from_str(raw).context("parsing mutation")?;
    let plan = mutation.invalidation_plan()?;
    let manager = connect().await?;
    let report = Invalidator::new(manager).apply(&plan).await;
    println!(
        "exact removed: {}, prefix removed: {}, namespace cleared: {}, failures: {}",
        report.exact_removed, report.prefix_removed, report.cleared, report.failures
    );
    if report.failures > 0 {
        bail!("{} invalidation target(s) failed", report.failures);
    }
    Ok(())
}

fn cmd_policies() {
    println!("{:<28} TTL", "OPERATION");
    for p in catalog::ALL {
        println!("{:<28} {}s", p.operation, p.ttl.as_secs());
    }
}
