//! Latency simulation
//!
//! The backtester applies two delays: feed latency (exchange event to
//! strategy visibility) and order latency split into entry (strategy to
//! exchange) and response (exchange back to strategy). Each is a
//! [`LatencyModel`] sampled per event from a seeded RNG, so a run is
//! reproducible bit for bit.

use rand::rngs::StdRng;
use rand::Rng;

pub const NS_PER_MS: i64 = 1_000_000;
pub const NS_PER_US: i64 = 1_000;

/// A sampled latency distribution, all values in nanoseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum LatencyModel {
    /// Fixed delay.
    Constant(i64),
    /// Gaussian, clamped into `[min, max]`.
    Normal {
        mean: i64,
        std: i64,
        min: i64,
        max: i64,
    },
    /// Empirical distribution given as (quantile, latency) points with
    /// quantiles ascending in `[0, 1]`; samples interpolate linearly.
    Interpolated(Vec<(f64, i64)>),
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self::Constant(0)
    }
}

impl LatencyModel {
    pub fn sample(&self, rng: &mut StdRng) -> i64 {
        match self {
            Self::Constant(value) => *value,
            Self::Normal {
                mean,
                std,
                min,
                max,
            } => {
                let z = sample_standard_normal(rng);
                let value = *mean as f64 + *std as f64 * z;
                (value as i64).clamp(*min, *max)
            }
            Self::Interpolated(points) => {
                if points.is_empty() {
                    return 0;
                }
                let u: f64 = rng.gen();
                let mut prev = points[0];
                if u <= prev.0 {
                    return prev.1;
                }
                for &point in &points[1..] {
                    if u <= point.0 {
                        let span = point.0 - prev.0;
                        if span <= 0.0 {
                            return point.1;
                        }
                        let w = (u - prev.0) / span;
                        return prev.1 + ((point.1 - prev.1) as f64 * w) as i64;
                    }
                    prev = point;
                }
                prev.1
            }
        }
    }
}

/// Box-Muller transform.
fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// The full dual-latency configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyConfig {
    /// Exchange event to strategy visibility.
    pub feed: LatencyModel,
    /// Strategy submit to exchange arrival.
    pub order_entry: LatencyModel,
    /// Exchange ack/fill back to strategy.
    pub order_response: LatencyModel,
}

impl LatencyConfig {
    /// Co-located profile with mild jitter.
    pub fn realistic() -> Self {
        Self {
            feed: LatencyModel::Normal {
                mean: 150 * NS_PER_US,
                std: 50 * NS_PER_US,
                min: 20 * NS_PER_US,
                max: 2 * NS_PER_MS,
            },
            order_entry: LatencyModel::Normal {
                mean: 400 * NS_PER_US,
                std: 120 * NS_PER_US,
                min: 50 * NS_PER_US,
                max: 5 * NS_PER_MS,
            },
            order_response: LatencyModel::Normal {
                mean: 250 * NS_PER_US,
                std: 80 * NS_PER_US,
                min: 30 * NS_PER_US,
                max: 3 * NS_PER_MS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_constant() {
        let mut rng = StdRng::seed_from_u64(42);
        let model = LatencyModel::Constant(1_000);
        for _ in 0..50 {
            assert_eq!(model.sample(&mut rng), 1_000);
        }
    }

    #[test]
    fn test_normal_clamped() {
        let mut rng = StdRng::seed_from_u64(42);
        let model = LatencyModel::Normal {
            mean: 1_000,
            std: 600,
            min: 100,
            max: 2_000,
        };
        for _ in 0..500 {
            let sample = model.sample(&mut rng);
            assert!((100..=2_000).contains(&sample));
        }
    }

    #[test]
    fn test_interpolated_bounds_and_midpoint() {
        let model = LatencyModel::Interpolated(vec![(0.0, 100), (0.5, 200), (1.0, 1_000)]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let sample = model.sample(&mut rng);
            assert!((100..=1_000).contains(&sample));
        }
    }

    #[test]
    fn test_seeded_determinism() {
        let model = LatencyModel::Normal {
            mean: 500,
            std: 100,
            min: 0,
            max: 1_000,
        };
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(model.sample(&mut a), model.sample(&mut b));
        }
    }
}
