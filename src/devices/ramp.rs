//! Ramp policies for moving actual power toward a commanded target.

use rand::Rng;
use serde::Deserialize;

use crate::devices::types::{clamp_finite, uniform_noise};

/// Smoothing factor of the canonical exponential ramp.
pub const DEFAULT_RAMP_FACTOR: f64 = 0.4;

/// How a controllable device approaches its target, applied once per step.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum RampPolicy {
    /// First-order approach: `p' = p + (target - p) * factor`.
    Exponential { factor: f64 },
    /// Fixed step toward the target, plus uniform jitter of `jitter_kw`.
    RateLimited {
        rate_kw_per_step: f64,
        #[serde(default)]
        jitter_kw: f64,
    },
}

impl Default for RampPolicy {
    fn default() -> Self {
        RampPolicy::Exponential {
            factor: DEFAULT_RAMP_FACTOR,
        }
    }
}

impl RampPolicy {
    /// Moves `current` toward `target` and clamps the result to `[p_min, p_max]`.
    pub fn next_power<R: Rng>(
        &self,
        current: f64,
        target: f64,
        p_min: f64,
        p_max: f64,
        rng: &mut R,
    ) -> f64 {
        let current = clamp_finite(current, p_min, p_max);
        let next = match *self {
            RampPolicy::Exponential { factor } => {
                let factor = clamp_finite(factor, 0.0, 1.0);
                current + (target - current) * factor
            }
            RampPolicy::RateLimited {
                rate_kw_per_step,
                jitter_kw,
            } => {
                let rate = rate_kw_per_step.max(0.0);
                let delta = target - current;
                let stepped = current + delta.signum() * delta.abs().min(rate);
                stepped + uniform_noise(rng, jitter_kw)
            }
        };
        clamp_finite(next, p_min, p_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn exponential_moves_fraction_of_gap() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = RampPolicy::default().next_power(0.0, 4.0, -4.0, 4.0, &mut rng);
        assert!((p - 1.6).abs() < 1e-12);
    }

    #[test]
    fn exponential_converges() {
        let mut rng = StdRng::seed_from_u64(0);
        let policy = RampPolicy::default();
        let mut p = 0.0;
        for _ in 0..100 {
            p = policy.next_power(p, -3.0, -4.0, 4.0, &mut rng);
        }
        assert!((p + 3.0).abs() < 1e-9);
    }

    #[test]
    fn rate_limited_steps_without_overshoot() {
        let mut rng = StdRng::seed_from_u64(0);
        let policy = RampPolicy::RateLimited {
            rate_kw_per_step: 1.0,
            jitter_kw: 0.0,
        };
        assert_eq!(policy.next_power(0.0, 2.5, -5.0, 5.0, &mut rng), 1.0);
        assert_eq!(policy.next_power(2.0, 2.5, -5.0, 5.0, &mut rng), 2.5);
        assert_eq!(policy.next_power(0.0, -0.4, -5.0, 5.0, &mut rng), -0.4);
        assert_eq!(policy.next_power(1.0, 1.0, -5.0, 5.0, &mut rng), 1.0);
    }

    #[test]
    fn jitter_is_reclamped() {
        let mut rng = StdRng::seed_from_u64(11);
        let policy = RampPolicy::RateLimited {
            rate_kw_per_step: 0.5,
            jitter_kw: 0.2,
        };
        for _ in 0..500 {
            let p = policy.next_power(4.0, 4.0, -4.0, 4.0, &mut rng);
            assert!((-4.0..=4.0).contains(&p));
        }
    }

    #[test]
    fn deserializes_tagged_policy() {
        let policy: RampPolicy =
            toml::from_str("model = \"rate_limited\"\nrate_kw_per_step = 0.5\n").unwrap();
        assert_eq!(
            policy,
            RampPolicy::RateLimited {
                rate_kw_per_step: 0.5,
                jitter_kw: 0.0
            }
        );
    }
}
