//! mcload - load generator for memcached-compatible servers

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use mcload::benchmark::run_agents;
use mcload::config::{CliArgs, ConnectionConfig, RunConfig};
use mcload::metrics::Reporter;

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn print_banner(args: &CliArgs, cfg: &ConnectionConfig) {
    if args.quiet {
        return;
    }
    println!("mcload v{}", env!("CARGO_PKG_VERSION"));
    println!("====================================");
    println!("Server: {}:{} ({}{})", args.server, args.port,
        if cfg.binary { "binary" } else { "text" },
        if cfg.udp { ", udp" } else { "" });
    println!(
        "Threads: {}, Connections/thread: {}, Depth: {}",
        args.threads, args.connections, cfg.depth
    );
    if cfg.lambda > 0.0 {
        println!("Rate: {} qps total ({:.1}/connection)", args.qps, cfg.lambda);
    } else {
        println!("Rate: unthrottled");
    }
    println!("Records: {}, Time: {}s", cfg.records, cfg.time_secs);
    if cfg.mix.is_active() {
        println!("Mix: ratio weights, sum {}", cfg.mix.sum());
    } else {
        println!("Mix: {:.0}% SET / {:.0}% GET", cfg.update * 100.0, (1.0 - cfg.update) * 100.0);
    }
    println!("====================================\n");
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose, args.quiet);

    let cfg = ConnectionConfig::from_cli(&args)
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    let run = RunConfig::from_cli(&args);

    print_banner(&args, &cfg);

    let result = run_agents(&run, &cfg).context("benchmark run failed")?;

    let reporter = Reporter::new(run.quiet);
    reporter.print_summary(&result.stats, result.measured_secs);
    if let Some(ref path) = run.json {
        reporter
            .write_json(path, &result.stats, result.measured_secs)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
