//! Resolved configuration derived from CLI arguments
//!
//! `ConnectionConfig` is the option set the connection core consumes;
//! `RunConfig` is what the orchestration shell needs on top of it.

use std::path::PathBuf;

use super::cli::CliArgs;
use crate::workload::{Distribution, OpMix};

/// Options recognized by the connection core.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Mean rate of the Poisson arrival process; 0 disables pacing
    pub lambda: f64,
    /// Maximum in-flight operations
    pub depth: usize,
    /// Key universe size
    pub records: u64,
    pub keysize: Distribution,
    pub valuesize: Distribution,
    pub ia: Distribution,
    /// SET fraction when the mix is inactive
    pub update: f64,
    /// Seven-way weighted op mix; inactive when all weights are zero
    pub mix: OpMix,

    pub binary: bool,
    pub udp: bool,
    pub sasl: bool,
    pub username: String,
    pub password: String,

    /// Pipelining width during loading
    pub loader_chunk: u64,
    /// Pause between loader chunks, microseconds
    pub rate_delay_us: u64,
    pub loadonly: bool,
    pub noload: bool,

    /// Measured phase duration in seconds
    pub time_secs: f64,
    pub moderate: bool,
    pub skip: bool,
    pub no_nodelay: bool,

    /// Per-connection RNG seed
    pub seed: u64,
}

impl ConnectionConfig {
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        args.validate()?;

        let keysize = Distribution::parse(&args.keysize)
            .map_err(|e| format!("--keysize: {}", e))?;
        let valuesize = Distribution::parse(&args.valuesize)
            .map_err(|e| format!("--valuesize: {}", e))?;
        let ia = Distribution::parse(&args.iadist)
            .map_err(|e| format!("--iadist: {}", e))?;
        let mix = match &args.ratio {
            Some(weights) => OpMix::parse(weights).map_err(|e| format!("--ratio: {}", e))?,
            None => OpMix::default(),
        };

        // Spread the aggregate rate evenly over every connection.
        let lambda = args.qps as f64 / (args.threads * args.connections) as f64;

        Ok(Self {
            lambda,
            depth: args.depth as usize,
            records: args.records,
            keysize,
            valuesize,
            ia,
            update: args.update,
            mix,
            binary: args.binary,
            udp: args.udp,
            sasl: args.sasl,
            username: args.username.clone(),
            password: args.password.clone(),
            loader_chunk: args.loader_chunk,
            rate_delay_us: args.rate_delay,
            loadonly: args.loadonly,
            noload: args.noload,
            time_secs: args.time as f64,
            moderate: args.moderate,
            skip: args.skip,
            no_nodelay: args.no_nodelay,
            seed: args.seed,
        })
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            lambda: 0.0,
            depth: 1,
            records: 10_000,
            keysize: Distribution::Fixed { value: 30.0 },
            valuesize: Distribution::Fixed { value: 200.0 },
            ia: Distribution::Exponential { scale: 1.0 },
            update: 0.0,
            mix: OpMix::default(),
            binary: false,
            udp: false,
            sasl: false,
            username: String::new(),
            password: String::new(),
            loader_chunk: 1024,
            rate_delay_us: 0,
            loadonly: false,
            noload: false,
            time_secs: 5.0,
            moderate: false,
            skip: false,
            no_nodelay: false,
            seed: 1,
        }
    }
}

/// Orchestration-level settings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub server: String,
    pub port: u16,
    pub threads: usize,
    pub connections_per_thread: usize,
    pub json: Option<PathBuf>,
    pub quiet: bool,
}

impl RunConfig {
    pub fn from_cli(args: &CliArgs) -> Self {
        Self {
            server: args.server.clone(),
            port: args.port,
            threads: args.threads as usize,
            connections_per_thread: args.connections as usize,
            json: args.json.clone(),
            quiet: args.quiet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("mcload").chain(args.iter().copied()))
    }

    #[test]
    fn test_lambda_split_across_connections() {
        let cfg =
            ConnectionConfig::from_cli(&cli(&["--qps", "8000", "-T", "2", "-c", "4"])).unwrap();
        assert!((cfg.lambda - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_qps_zero_disables_pacing() {
        let cfg = ConnectionConfig::from_cli(&cli(&[])).unwrap();
        assert_eq!(cfg.lambda, 0.0);
    }

    #[test]
    fn test_ratio_parsed() {
        let cfg = ConnectionConfig::from_cli(&cli(&["--ratio", "1:0:0:2:5:1:1"])).unwrap();
        assert!(cfg.mix.is_active());
        assert_eq!(cfg.mix.sum(), 10);
    }

    #[test]
    fn test_bad_descriptor_rejected() {
        assert!(ConnectionConfig::from_cli(&cli(&["--keysize", "zipf:1"])).is_err());
    }
}
