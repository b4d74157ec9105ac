//! Value distributions for workload parameters
//!
//! Key sizes, value sizes and inter-arrival gaps are all described on the
//! command line as `name:param:param` descriptors and sampled through one
//! enum. Samples are real numbers; size consumers round and clamp.
//!
//! ## Descriptor syntax
//!
//! ```text
//! fixed:30              - constant 30
//! uniform:10:100        - uniform in [10, 100)
//! normal:30:8           - Gaussian, mean 30, stddev 8
//! exponential           - rate set later via set_rate (inter-arrival use)
//! exponential:0.5       - exponential with scale 0.5
//! pareto:0:1:0.15       - generalized Pareto (loc, scale, shape)
//! ```

/// A sampleable distribution over f64.
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Fixed { value: f64 },
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, stddev: f64 },
    Exponential { scale: f64 },
    Pareto { loc: f64, scale: f64, shape: f64 },
}

impl Distribution {
    /// Parse a colon-separated descriptor.
    pub fn parse(input: &str) -> Result<Self, String> {
        let parts: Vec<&str> = input.split(':').collect();
        let num = |s: &str| -> Result<f64, String> {
            s.parse()
                .map_err(|_| format!("Invalid number '{}' in distribution '{}'", s, input))
        };

        match parts[0].to_lowercase().as_str() {
            "fixed" => {
                if parts.len() != 2 {
                    return Err("fixed requires a value parameter".into());
                }
                Ok(Distribution::Fixed { value: num(parts[1])? })
            }
            "uniform" => {
                if parts.len() != 3 {
                    return Err("uniform requires min:max parameters".into());
                }
                let (min, max) = (num(parts[1])?, num(parts[2])?);
                if max <= min {
                    return Err(format!("uniform requires min < max, got '{}'", input));
                }
                Ok(Distribution::Uniform { min, max })
            }
            "normal" => {
                if parts.len() != 3 {
                    return Err("normal requires mean:stddev parameters".into());
                }
                Ok(Distribution::Normal {
                    mean: num(parts[1])?,
                    stddev: num(parts[2])?,
                })
            }
            "exponential" => {
                let scale = if parts.len() > 1 { num(parts[1])? } else { 1.0 };
                Ok(Distribution::Exponential { scale })
            }
            "pareto" => {
                if parts.len() != 4 {
                    return Err("pareto requires loc:scale:shape parameters".into());
                }
                Ok(Distribution::Pareto {
                    loc: num(parts[1])?,
                    scale: num(parts[2])?,
                    shape: num(parts[3])?,
                })
            }
            // A bare number is shorthand for fixed. "0" disables pacing.
            _ if parts.len() == 1 => Ok(Distribution::Fixed { value: num(parts[0])? }),
            other => Err(format!("Unknown distribution '{}'", other)),
        }
    }

    /// Rescale an exponential so samples average `1/rate` (Poisson arrivals).
    /// Non-exponential distributions are left alone.
    pub fn set_rate(&mut self, rate: f64) {
        if let Distribution::Exponential { scale } = self {
            *scale = 1.0 / rate;
        }
    }

    /// Draw one sample from the connection's streaming RNG.
    pub fn sample(&self, rng: &mut fastrand::Rng) -> f64 {
        match *self {
            Distribution::Fixed { value } => value,
            Distribution::Uniform { min, max } => min + rng.f64() * (max - min),
            Distribution::Normal { mean, stddev } => {
                // Box-Muller transform
                let u1 = rng.f64().max(f64::MIN_POSITIVE);
                let u2 = rng.f64();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                mean + z * stddev
            }
            Distribution::Exponential { scale } => {
                let u = rng.f64().max(f64::MIN_POSITIVE);
                -u.ln() * scale
            }
            Distribution::Pareto { loc, scale, shape } => {
                let u = rng.f64().max(f64::MIN_POSITIVE);
                if shape == 0.0 {
                    loc - scale * u.ln()
                } else {
                    loc + scale * (u.powf(-shape) - 1.0) / shape
                }
            }
        }
    }

    /// Draw the deterministic sample for `seed` (same seed, same value).
    pub fn sample_seeded(&self, seed: u64) -> f64 {
        let mut rng = fastrand::Rng::with_seed(seed);
        self.sample(&mut rng)
    }

    /// Sample rounded to a usable byte count (at least 1).
    pub fn sample_size(&self, rng: &mut fastrand::Rng) -> usize {
        self.sample(rng).round().max(1.0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed() {
        assert_eq!(
            Distribution::parse("fixed:30").unwrap(),
            Distribution::Fixed { value: 30.0 }
        );
        // bare-number shorthand
        assert_eq!(
            Distribution::parse("0").unwrap(),
            Distribution::Fixed { value: 0.0 }
        );
    }

    #[test]
    fn test_parse_uniform() {
        assert_eq!(
            Distribution::parse("uniform:10:100").unwrap(),
            Distribution::Uniform { min: 10.0, max: 100.0 }
        );
        assert!(Distribution::parse("uniform:100:10").is_err());
    }

    #[test]
    fn test_parse_normal_and_pareto() {
        assert_eq!(
            Distribution::parse("normal:30:8").unwrap(),
            Distribution::Normal { mean: 30.0, stddev: 8.0 }
        );
        assert_eq!(
            Distribution::parse("pareto:0:214.476:0.348238").unwrap(),
            Distribution::Pareto { loc: 0.0, scale: 214.476, shape: 0.348238 }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Distribution::parse("zipfian:1.0").is_err());
        assert!(Distribution::parse("fixed:abc").is_err());
        assert!(Distribution::parse("normal:1").is_err());
    }

    #[test]
    fn test_set_rate() {
        let mut d = Distribution::parse("exponential").unwrap();
        d.set_rate(1000.0);
        assert_eq!(d, Distribution::Exponential { scale: 0.001 });

        let mut f = Distribution::Fixed { value: 3.0 };
        f.set_rate(1000.0);
        assert_eq!(f, Distribution::Fixed { value: 3.0 });
    }

    #[test]
    fn test_exponential_mean() {
        // Empirical mean of exponential samples converges to the scale.
        let d = Distribution::Exponential { scale: 0.001 };
        let mut rng = fastrand::Rng::with_seed(7);
        let n = 200_000;
        let sum: f64 = (0..n).map(|_| d.sample(&mut rng)).sum();
        let mean = sum / n as f64;
        assert!((mean - 0.001).abs() < 0.0001, "mean {} too far off", mean);
    }

    #[test]
    fn test_uniform_bounds() {
        let d = Distribution::Uniform { min: 5.0, max: 9.0 };
        let mut rng = fastrand::Rng::with_seed(3);
        for _ in 0..1000 {
            let v = d.sample(&mut rng);
            assert!((5.0..9.0).contains(&v));
        }
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let d = Distribution::Normal { mean: 30.0, stddev: 8.0 };
        assert_eq!(d.sample_seeded(42), d.sample_seeded(42));
        assert_ne!(d.sample_seeded(42), d.sample_seeded(43));
    }

    #[test]
    fn test_sample_size_floor() {
        let d = Distribution::Fixed { value: 0.2 };
        let mut rng = fastrand::Rng::new();
        assert_eq!(d.sample_size(&mut rng), 1);
    }
}
