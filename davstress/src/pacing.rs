//! Think-time between the tasks of a virtual user.

use std::time::Duration;

use rand::Rng;

use crate::error::ConfigurationError;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// The randomized think-time between two tasks of one virtual user.
///
/// Every decision draws uniformly from the closed interval `[min, max]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PacingPolicy {
    min: Duration,
    max: Duration,
}

impl PacingPolicy {
    /// Creates a policy for the interval `[min, max]`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigurationError> {
        if min > max {
            return Err(ConfigurationError::InvalidPacing { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draws the next pause.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }

        // Any valid `Duration` span fits into u128 nanoseconds.
        let offset = rng.random_range(0..=(self.max - self.min).as_nanos());
        let secs = (offset / NANOS_PER_SEC) as u64;
        let nanos = (offset % NANOS_PER_SEC) as u32;
        self.min + Duration::new(secs, nanos)
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn rejects_inverted_interval() {
        let result = PacingPolicy::new(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::InvalidPacing {
                min: Duration::from_secs(5),
                max: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn samples_stay_within_bounds() {
        let policy = PacingPolicy::new(Duration::from_secs(2), Duration::from_secs(5)).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);

        for _ in 0..10_000 {
            let pause = policy.sample(&mut rng);
            assert!(pause >= policy.min() && pause <= policy.max(), "{pause:?}");
        }
    }

    #[test]
    fn degenerate_interval_is_constant() {
        let policy = PacingPolicy::new(Duration::from_millis(250), Duration::from_millis(250))
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(0);

        for _ in 0..10_000 {
            assert_eq!(policy.sample(&mut rng), Duration::from_millis(250));
        }
    }

    #[test]
    fn zero_pacing_is_allowed() {
        let policy = PacingPolicy::new(Duration::ZERO, Duration::ZERO).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(policy.sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn samples_intervals_beyond_u64_nanos() {
        // Larger than `u64::MAX` nanoseconds, roughly 585 years.
        let max = Duration::from_secs(18_446_744_074);
        let policy = PacingPolicy::new(Duration::from_secs(1), max).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);

        for _ in 0..1000 {
            let pause = policy.sample(&mut rng);
            assert!(pause >= Duration::from_secs(1) && pause <= max, "{pause:?}");
        }

        let huge = PacingPolicy::new(Duration::MAX, Duration::MAX).unwrap();
        assert_eq!(huge.sample(&mut rng), Duration::MAX);

        let full = PacingPolicy::new(Duration::ZERO, Duration::MAX).unwrap();
        full.sample(&mut rng);
    }
}
