//! Command-line argument parsing
//!
//! Arguments are grouped by category. Distribution-valued options take
//! colon descriptors (see `workload::generator`); the op mix takes seven
//! integer weights.

use clap::Parser;
use std::path::PathBuf;

/// Load generator for memcached-compatible servers
#[derive(Parser, Debug, Clone)]
#[command(name = "mcload")]
#[command(version, about, long_about = "Load generator for memcached-compatible servers.\n\n\
Drives a server at a target request rate over the text or binary protocol\n\
(TCP or UDP), measuring per-operation latency and throughput.")]
#[command(disable_version_flag = true)]
pub struct CliArgs {
    // ===== Connection =====
    /// Server hostname
    #[arg(short = 's', long = "server", default_value = "127.0.0.1")]
    pub server: String,

    /// Server port
    #[arg(short = 'p', long = "port", default_value_t = 11211)]
    pub port: u16,

    /// Worker threads, each running its own event loop
    #[arg(short = 'T', long = "threads", default_value_t = 1)]
    pub threads: u32,

    /// Connections per thread
    #[arg(short = 'c', long = "connections", default_value_t = 1)]
    pub connections: u32,

    /// Use the binary protocol instead of text
    #[arg(long = "binary")]
    pub binary: bool,

    /// Use UDP transport instead of TCP
    #[arg(long = "udp")]
    pub udp: bool,

    /// Leave Nagle's algorithm enabled on TCP sockets
    #[arg(long = "no-nodelay")]
    pub no_nodelay: bool,

    /// Authenticate with SASL PLAIN on connect (binary protocol, TCP)
    #[arg(long = "sasl")]
    pub sasl: bool,

    /// SASL username
    #[arg(long = "username", default_value = "")]
    pub username: String,

    /// SASL password
    #[arg(long = "password", default_value = "")]
    pub password: String,

    // ===== Load shape =====
    /// Aggregate target request rate for the Poisson arrival process
    /// (requests/sec across all connections); 0 issues as fast as depth allows
    #[arg(short = 'q', long = "qps", default_value_t = 0)]
    pub qps: u64,

    /// Measured phase duration in seconds
    #[arg(short = 't', long = "time", default_value_t = 5)]
    pub time: u64,

    /// Maximum in-flight operations per connection
    #[arg(short = 'd', long = "depth", default_value_t = 1)]
    pub depth: u32,

    /// Keep at least 250us between the last response and the next issue
    #[arg(long = "moderate")]
    pub moderate: bool,

    /// Drop missed arrival slots when issues fall behind with a full queue
    #[arg(long = "skip")]
    pub skip: bool,

    // ===== Workload =====
    /// Key universe size
    #[arg(short = 'r', long = "records", default_value_t = 10_000)]
    pub records: u64,

    /// Key length distribution descriptor
    #[arg(short = 'K', long = "keysize", default_value = "fixed:30")]
    pub keysize: String,

    /// Value length distribution descriptor
    #[arg(short = 'V', long = "valuesize", default_value = "fixed:200")]
    pub valuesize: String,

    /// Inter-arrival time distribution descriptor
    #[arg(short = 'i', long = "iadist", default_value = "exponential")]
    pub iadist: String,

    /// Fraction of operations that are SETs (ignored when --ratio is given)
    #[arg(short = 'u', long = "update", default_value_t = 0.0)]
    pub update: f64,

    /// Seven-way op mix weights `sa:slss:slds:ga:gl:da:dl`
    #[arg(long = "ratio")]
    pub ratio: Option<String>,

    /// RNG seed; 0 picks a random seed per connection
    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,

    // ===== Loading phase =====
    /// Pipeline width while pre-populating the server
    #[arg(long = "loader-chunk", default_value_t = 1024)]
    pub loader_chunk: u64,

    /// Microseconds to pause between loader chunks
    #[arg(long = "rate-delay", default_value_t = 0)]
    pub rate_delay: u64,

    /// Exit after the loading phase completes
    #[arg(long = "loadonly")]
    pub loadonly: bool,

    /// Skip the loading phase
    #[arg(long = "noload")]
    pub noload: bool,

    // ===== Output =====
    /// Write the final report as JSON to this path
    #[arg(long = "json")]
    pub json: Option<PathBuf>,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Errors only
    #[arg(long = "quiet")]
    pub quiet: bool,
}

impl CliArgs {
    /// Validate cross-argument constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads == 0 || self.connections == 0 {
            return Err("--threads and --connections must be at least 1".into());
        }
        if self.depth == 0 {
            return Err("--depth must be at least 1".into());
        }
        if self.records == 0 {
            return Err("--records must be at least 1".into());
        }
        if self.loader_chunk == 0 {
            return Err("--loader-chunk must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.update) {
            return Err("--update must be a fraction in [0, 1]".into());
        }
        if self.sasl && !self.binary {
            return Err("--sasl requires --binary".into());
        }
        if self.sasl && self.udp {
            return Err("--sasl is only supported over TCP".into());
        }
        if self.loadonly && self.noload {
            return Err("--loadonly and --noload are mutually exclusive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("mcload").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.server, "127.0.0.1");
        assert_eq!(args.port, 11211);
        assert_eq!(args.depth, 1);
        assert_eq!(args.keysize, "fixed:30");
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_sasl_requires_binary() {
        let args = parse(&["--sasl"]);
        assert!(args.validate().is_err());
        let args = parse(&["--sasl", "--binary"]);
        assert!(args.validate().is_ok());
        let args = parse(&["--sasl", "--binary", "--udp"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_loadonly_noload_conflict() {
        let args = parse(&["--loadonly", "--noload"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_update_bounds() {
        let args = parse(&["--update", "1.5"]);
        assert!(args.validate().is_err());
    }
}
