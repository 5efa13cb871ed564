use std::time::Duration;

use rand::Rng;

/// Randomised pause inserted between consecutive outbound requests to the
/// scraped site. Not a synchronisation primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Politeness {
    min: Duration,
    max: Duration,
}

impl Politeness {
    pub fn new(min: Duration, max: Duration) -> Self {
        if max < min {
            return Self { min: max, max: min };
        }
        Self { min, max }
    }

    pub fn from_secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    /// No delay at all. Tests and replays.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn is_none(&self) -> bool {
        self.max.is_zero()
    }

    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    pub async fn pause(&self) {
        if self.is_none() {
            return;
        }
        tokio::time::sleep(self.next_delay()).await;
    }
}

impl Default for Politeness {
    fn default() -> Self {
        Self::from_secs(1, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_within_bounds() {
        let p = Politeness::from_secs(2, 4);
        for _ in 0..50 {
            let d = p.next_delay();
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(4));
        }
    }

    #[test]
    fn swapped_bounds_are_normalised() {
        assert_eq!(Politeness::from_secs(5, 3), Politeness::from_secs(3, 5));
    }

    #[tokio::test]
    async fn none_returns_immediately() {
        let start = std::time::Instant::now();
        Politeness::none().pause().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
