//! Final report formatting
//!
//! Console block for humans, JSON file for pipelines.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use hdrhistogram::Histogram;
use serde::Serialize;

use super::stats::ConnectionStats;

pub struct Reporter {
    pub quiet: bool,
}

#[derive(Debug, Serialize)]
struct LatencySummary {
    count: u64,
    mean_us: f64,
    p50_us: u64,
    p95_us: u64,
    p99_us: u64,
    p999_us: u64,
    max_us: u64,
}

impl LatencySummary {
    fn from_histogram(hist: &Histogram<u64>) -> Self {
        Self {
            count: hist.len(),
            mean_us: hist.mean(),
            p50_us: hist.value_at_percentile(50.0),
            p95_us: hist.value_at_percentile(95.0),
            p99_us: hist.value_at_percentile(99.0),
            p999_us: hist.value_at_percentile(99.9),
            max_us: hist.max(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MixSummary {
    sa: u64,
    slss: u64,
    slds: u64,
    ga: u64,
    gl: u64,
    da: u64,
    dl: u64,
}

/// Serializable view of a finished run.
#[derive(Debug, Serialize)]
struct RunSummary {
    duration_secs: f64,
    completed_ops: u64,
    throughput: f64,
    gets: u64,
    get_hits: u64,
    get_misses: u64,
    sets: u64,
    deletes: u64,
    tx_bytes: u64,
    rx_bytes: u64,
    skips: u64,
    avg_depth: f64,
    mix: MixSummary,
    get_latency: LatencySummary,
    set_latency: LatencySummary,
    delete_latency: LatencySummary,
}

impl RunSummary {
    fn new(stats: &ConnectionStats, elapsed_secs: f64) -> Self {
        let throughput = if elapsed_secs > 0.0 {
            stats.completed() as f64 / elapsed_secs
        } else {
            0.0
        };
        let t = &stats.mix_tallies;
        Self {
            duration_secs: elapsed_secs,
            completed_ops: stats.completed(),
            throughput,
            gets: stats.gets,
            get_hits: stats.get_hits(),
            get_misses: stats.get_misses,
            sets: stats.sets,
            deletes: stats.deletes,
            tx_bytes: stats.tx_bytes,
            rx_bytes: stats.rx_bytes,
            skips: stats.skips,
            avg_depth: stats.avg_depth(),
            mix: MixSummary {
                sa: t[0],
                slss: t[1],
                slds: t[2],
                ga: t[3],
                gl: t[4],
                da: t[5],
                dl: t[6],
            },
            get_latency: LatencySummary::from_histogram(&stats.get_latency),
            set_latency: LatencySummary::from_histogram(&stats.set_latency),
            delete_latency: LatencySummary::from_histogram(&stats.delete_latency),
        }
    }
}

fn print_latency_block(name: &str, count: u64, hist: &Histogram<u64>) {
    if count == 0 {
        return;
    }
    println!("\n{} latency (us), {} samples:", name, count);
    println!("  avg: {:.1}", hist.mean());
    println!("  p50: {}", hist.value_at_percentile(50.0));
    println!("  p95: {}", hist.value_at_percentile(95.0));
    println!("  p99: {}", hist.value_at_percentile(99.0));
    println!("  p99.9: {}", hist.value_at_percentile(99.9));
    println!("  max: {}", hist.max());
}

impl Reporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Print the merged run summary to stdout.
    pub fn print_summary(&self, stats: &ConnectionStats, elapsed_secs: f64) {
        if self.quiet {
            return;
        }
        let qps = if elapsed_secs > 0.0 {
            stats.completed() as f64 / elapsed_secs
        } else {
            0.0
        };

        println!("\n=== mcload run ===");
        println!("Duration: {:.2}s", elapsed_secs);
        println!("Completed: {} ops ({:.2} ops/sec)", stats.completed(), qps);
        println!(
            "GET: {} ({} hits, {} misses)  SET: {}  DELETE: {}",
            stats.gets,
            stats.get_hits(),
            stats.get_misses,
            stats.sets,
            stats.deletes
        );
        println!(
            "TX: {} bytes  RX: {} bytes  Skipped slots: {}  Avg depth: {:.2}",
            stats.tx_bytes,
            stats.rx_bytes,
            stats.skips,
            stats.avg_depth()
        );
        if stats.mix_tallies.iter().any(|&t| t > 0) {
            let t = &stats.mix_tallies;
            println!(
                "Mix: sa={} slss={} slds={} ga={} gl={} da={} dl={}",
                t[0], t[1], t[2], t[3], t[4], t[5], t[6]
            );
        }

        print_latency_block("GET", stats.gets, &stats.get_latency);
        print_latency_block("SET", stats.sets, &stats.set_latency);
        print_latency_block("DELETE", stats.deletes, &stats.delete_latency);
    }

    /// Write the same summary as JSON.
    pub fn write_json(
        &self,
        path: &Path,
        stats: &ConnectionStats,
        elapsed_secs: f64,
    ) -> io::Result<()> {
        let summary = RunSummary::new(stats, elapsed_secs);
        let mut file = File::create(path)?;
        file.write_all(serde_json::to_string_pretty(&summary)?.as_bytes())?;
        file.write_all(b"\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_json() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("mcload-report-{}.json", std::process::id()));

        let mut stats = ConnectionStats::new();
        stats.tx_bytes = 123;
        stats.get_misses = 0;
        let reporter = Reporter::new(true);
        reporter.write_json(&path, &stats, 2.0).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(doc["tx_bytes"], 123);
        assert_eq!(doc["duration_secs"], 2.0);
        assert_eq!(doc["mix"]["sa"], 0);
        std::fs::remove_file(&path).ok();
    }
}
