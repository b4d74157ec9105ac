//! Per-connection statistics accumulator
//!
//! The connection core reports into this sink at two points: every issue
//! logs the queue depth, every completion logs a latency sample for its op
//! type. Byte, miss and skip counters ride alongside. Accumulators are
//! plain thread-local values; agents merge them after their loops stop.

use hdrhistogram::Histogram;

use crate::client::op_queue::Operation;
use crate::workload::mix::MixCase;

/// Histogram range: 1 µs to 1 hour, 3 significant digits.
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 3_600_000_000;
const HIST_SIGFIG: u8 = 3;

pub struct ConnectionStats {
    /// GET latency in microseconds
    pub get_latency: Histogram<u64>,
    /// SET latency in microseconds
    pub set_latency: Histogram<u64>,
    /// DELETE latency in microseconds
    pub delete_latency: Histogram<u64>,

    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub get_misses: u64,

    pub tx_bytes: u64,
    pub rx_bytes: u64,

    /// Arrival slots dropped by the catch-up rule
    pub skips: u64,

    /// Issues observed, and the queue depth summed at each issue
    pub ops: u64,
    pub depth_sum: u64,

    /// Per-case tallies of the mixed workload (sa..dl)
    pub mix_tallies: [u64; 7],
}

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("Failed to create histogram")
}

fn latency_us(op: &Operation) -> u64 {
    (op.latency() * 1_000_000.0).round().max(0.0) as u64
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self {
            get_latency: new_histogram(),
            set_latency: new_histogram(),
            delete_latency: new_histogram(),
            gets: 0,
            sets: 0,
            deletes: 0,
            get_misses: 0,
            tx_bytes: 0,
            rx_bytes: 0,
            skips: 0,
            ops: 0,
            depth_sum: 0,
            mix_tallies: [0; 7],
        }
    }

    /// Record one issue and the queue depth it observed.
    pub fn log_op(&mut self, queue_depth: usize) {
        self.ops += 1;
        self.depth_sum += queue_depth as u64;
    }

    pub fn log_get(&mut self, op: &Operation) {
        self.gets += 1;
        self.get_latency.record(latency_us(op)).ok();
    }

    pub fn log_set(&mut self, op: &Operation) {
        self.sets += 1;
        self.set_latency.record(latency_us(op)).ok();
    }

    pub fn log_delete(&mut self, op: &Operation) {
        self.deletes += 1;
        self.delete_latency.record(latency_us(op)).ok();
    }

    pub fn log_mix_case(&mut self, case: MixCase) {
        self.mix_tallies[case as usize] += 1;
    }

    /// GETs that found a value.
    pub fn get_hits(&self) -> u64 {
        self.gets - self.get_misses
    }

    /// Completed operations of any type.
    pub fn completed(&self) -> u64 {
        self.gets + self.sets + self.deletes
    }

    /// Mean queue depth seen at issue time.
    pub fn avg_depth(&self) -> f64 {
        if self.ops == 0 {
            0.0
        } else {
            self.depth_sum as f64 / self.ops as f64
        }
    }

    /// Fold another connection's accumulator into this one.
    pub fn merge(&mut self, other: &ConnectionStats) {
        self.get_latency.add(&other.get_latency).ok();
        self.set_latency.add(&other.set_latency).ok();
        self.delete_latency.add(&other.delete_latency).ok();
        self.gets += other.gets;
        self.sets += other.sets;
        self.deletes += other.deletes;
        self.get_misses += other.get_misses;
        self.tx_bytes += other.tx_bytes;
        self.rx_bytes += other.rx_bytes;
        self.skips += other.skips;
        self.ops += other.ops;
        self.depth_sum += other.depth_sum;
        for (mine, theirs) in self.mix_tallies.iter_mut().zip(&other.mix_tallies) {
            *mine += theirs;
        }
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::op_queue::OpKind;

    fn op_with_latency(kind: OpKind, seconds: f64) -> Operation {
        let mut op = Operation::new(kind, "k".into(), 10.0);
        op.end_time = 10.0 + seconds;
        op
    }

    #[test]
    fn test_log_get_records_microseconds() {
        let mut stats = ConnectionStats::new();
        stats.log_get(&op_with_latency(OpKind::Get, 0.0025));
        assert_eq!(stats.gets, 1);
        let p50 = stats.get_latency.value_at_percentile(50.0);
        assert!((2490..=2510).contains(&p50), "p50 {}", p50);
    }

    #[test]
    fn test_hits_plus_misses() {
        let mut stats = ConnectionStats::new();
        for _ in 0..5 {
            stats.log_get(&op_with_latency(OpKind::Get, 0.001));
        }
        stats.get_misses = 2;
        assert_eq!(stats.get_hits() + stats.get_misses, stats.gets);
    }

    #[test]
    fn test_avg_depth() {
        let mut stats = ConnectionStats::new();
        stats.log_op(1);
        stats.log_op(3);
        assert!((stats.avg_depth() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge() {
        let mut a = ConnectionStats::new();
        let mut b = ConnectionStats::new();
        a.log_get(&op_with_latency(OpKind::Get, 0.001));
        a.tx_bytes = 100;
        b.log_set(&op_with_latency(OpKind::Set, 0.002));
        b.rx_bytes = 50;
        b.skips = 3;
        b.mix_tallies[4] = 7;

        a.merge(&b);
        assert_eq!(a.completed(), 2);
        assert_eq!(a.tx_bytes, 100);
        assert_eq!(a.rx_bytes, 50);
        assert_eq!(a.skips, 3);
        assert_eq!(a.mix_tallies[4], 7);
        assert_eq!(a.set_latency.len(), 1);
    }
}
