//! Weighted seven-way operation mix
//!
//! A request mix is seven integer weights, one per case, walked with a
//! uniform draw in `[0, sum)`. When every weight is zero the mix is
//! inactive and the simple update-fraction selector applies instead.

/// The seven mixed-workload cases, in weight-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixCase {
    /// Set a key known to be absent
    SetAbsent,
    /// Set a loaded key, same size
    SetLoadedSameSize,
    /// Set a loaded key, different size
    SetLoadedDiffSize,
    /// Get a key known to be absent
    GetAbsent,
    /// Get a loaded key
    GetLoaded,
    /// Delete a key known to be absent
    DeleteAbsent,
    /// Delete a loaded key
    DeleteLoaded,
}

pub const MIX_CASES: [MixCase; 7] = [
    MixCase::SetAbsent,
    MixCase::SetLoadedSameSize,
    MixCase::SetLoadedDiffSize,
    MixCase::GetAbsent,
    MixCase::GetLoaded,
    MixCase::DeleteAbsent,
    MixCase::DeleteLoaded,
];

#[derive(Debug, Clone, Default)]
pub struct OpMix {
    weights: [u32; 7],
    sum: u32,
}

impl OpMix {
    pub fn new(weights: [u32; 7]) -> Self {
        let sum = weights.iter().sum();
        Self { weights, sum }
    }

    /// Parse `sa:slss:slds:ga:gl:da:dl` integer weights.
    pub fn parse(input: &str) -> Result<Self, String> {
        let parts: Vec<&str> = input.split(':').collect();
        if parts.len() != 7 {
            return Err(format!(
                "Ratio needs 7 weights (sa:slss:slds:ga:gl:da:dl), got {}",
                parts.len()
            ));
        }
        let mut weights = [0u32; 7];
        for (slot, part) in weights.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("Invalid ratio weight '{}'", part))?;
        }
        Ok(Self::new(weights))
    }

    /// Total weight; zero means the mix is disabled.
    pub fn sum(&self) -> u32 {
        self.sum
    }

    pub fn is_active(&self) -> bool {
        self.sum > 0
    }

    /// Weight of a single case.
    pub fn weight(&self, case: MixCase) -> u32 {
        self.weights[case as usize]
    }

    /// Pick a case by walking the weight table with a uniform draw.
    pub fn choose(&self, rng: &mut fastrand::Rng) -> MixCase {
        debug_assert!(self.sum > 0);
        let mut draw = rng.u32(0..self.sum) as i64;
        for (case, &weight) in MIX_CASES.iter().zip(&self.weights) {
            draw -= weight as i64;
            if draw < 0 {
                return *case;
            }
        }
        // Unreachable with sum > 0; keep the walk total.
        MixCase::DeleteLoaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let mix = OpMix::parse("1:0:0:2:5:1:1").unwrap();
        assert_eq!(mix.sum(), 10);
        assert_eq!(mix.weight(MixCase::SetAbsent), 1);
        assert_eq!(mix.weight(MixCase::GetLoaded), 5);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(OpMix::parse("1:2:3").is_err());
        assert!(OpMix::parse("1:2:3:4:5:6:x").is_err());
    }

    #[test]
    fn test_inactive_when_all_zero() {
        assert!(!OpMix::new([0; 7]).is_active());
        assert!(OpMix::new([0, 0, 0, 0, 1, 0, 0]).is_active());
    }

    #[test]
    fn test_choose_single_case() {
        let mix = OpMix::new([0, 0, 0, 0, 0, 0, 3]);
        let mut rng = fastrand::Rng::with_seed(1);
        for _ in 0..50 {
            assert_eq!(mix.choose(&mut rng), MixCase::DeleteLoaded);
        }
    }

    #[test]
    fn test_choose_respects_weights() {
        let mix = OpMix::new([1, 0, 0, 0, 9, 0, 0]);
        let mut rng = fastrand::Rng::with_seed(99);
        let mut counts = [0u32; 7];
        for _ in 0..10_000 {
            counts[mix.choose(&mut rng) as usize] += 1;
        }
        assert_eq!(counts[1] + counts[2] + counts[3] + counts[5] + counts[6], 0);
        let sa_frac = counts[0] as f64 / 10_000.0;
        assert!((sa_frac - 0.1).abs() < 0.02, "sa fraction {}", sa_frac);
    }
}
