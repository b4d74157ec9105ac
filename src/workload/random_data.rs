//! Shared value byte table
//!
//! SET payloads are slices of a process-wide 1 MiB table of deterministic
//! pseudo-random bytes, addressed by `key_index mod 2^20`. The table is
//! built once and only read afterwards, so connections on any thread can
//! share it without coordination.

use std::sync::OnceLock;

pub const TABLE_LEN: usize = 1 << 20;

const TABLE_SEED: u64 = 0x6d63_6c6f_6164_5f76; // stable across runs

static TABLE: OnceLock<Box<[u8]>> = OnceLock::new();

fn table() -> &'static [u8] {
    TABLE.get_or_init(|| {
        let mut rng = fastrand::Rng::with_seed(TABLE_SEED);
        let mut bytes = vec![0u8; TABLE_LEN];
        rng.fill(&mut bytes);
        bytes.into_boxed_slice()
    })
}

/// Copy `len` value bytes starting at `index mod 2^20` into `out`,
/// wrapping at the end of the table.
pub fn fill_value(index: u64, len: usize, out: &mut Vec<u8>) {
    let data = table();
    let mut at = (index as usize) & (TABLE_LEN - 1);
    out.clear();
    out.reserve(len);
    let mut remaining = len;
    while remaining > 0 {
        let take = remaining.min(TABLE_LEN - at);
        out.extend_from_slice(&data[at..at + take]);
        remaining -= take;
        at = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_len_and_determinism() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        fill_value(12345, 64, &mut a);
        fill_value(12345, 64, &mut b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_index_wraps_table() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        fill_value(7, 16, &mut a);
        fill_value(7 + TABLE_LEN as u64, 16, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_value_wraps_at_end() {
        let mut out = Vec::new();
        fill_value((TABLE_LEN - 4) as u64, 8, &mut out);
        assert_eq!(out.len(), 8);
        let mut head = Vec::new();
        fill_value(0, 4, &mut head);
        assert_eq!(&out[4..], &head[..]);
    }

    #[test]
    fn test_clears_previous_contents() {
        let mut out = vec![1, 2, 3];
        fill_value(0, 2, &mut out);
        assert_eq!(out.len(), 2);
    }
}
