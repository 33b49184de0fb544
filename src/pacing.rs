use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::PacingSettings;
use crate::error::{IngestError, IngestResult};

/// Spaces out requests and computes retry backoff for every network call.
#[derive(Debug, Clone)]
pub struct Pacer {
    settings: PacingSettings,
}

impl Pacer {
    pub fn new(settings: PacingSettings) -> Self {
        Pacer { settings }
    }

    pub fn max_retries(&self) -> u32 {
        self.settings.max_retries
    }

    /// `base + random(0, jitter_max)`.
    pub fn delay(&self) -> Duration {
        let jitter_ms = self.settings.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.settings.base_delay + Duration::from_millis(jitter)
    }

    /// `base * multiplier^attempt`, or `RetriesExhausted` once `attempt`
    /// reaches the retry cap.
    pub fn backoff(&self, attempt: u32) -> IngestResult<Duration> {
        if attempt >= self.settings.max_retries {
            return Err(IngestError::RetriesExhausted {
                attempts: attempt,
                last_error: "rate limited".into(),
            });
        }
        let factor = self.settings.backoff_multiplier.saturating_pow(attempt);
        Ok(self.settings.backoff_base.saturating_mul(factor))
    }

    /// Sleep for one inter-request delay.
    pub async fn pause(&self) {
        let d = self.delay();
        debug!("Pacing delay {:.1}s", d.as_secs_f64());
        tokio::time::sleep(d).await;
    }

    /// Sleep for the backoff of `attempt`, failing instead once retries are spent.
    pub async fn back_off(&self, attempt: u32) -> IngestResult<Duration> {
        let d = self.backoff(attempt)?;
        tokio::time::sleep(d).await;
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_ms: u64, jitter_ms: u64) -> PacingSettings {
        PacingSettings {
            base_delay: Duration::from_millis(base_ms),
            jitter_max: Duration::from_millis(jitter_ms),
            backoff_base: Duration::from_millis(base_ms),
            backoff_multiplier: 2,
            max_retries: 3,
        }
    }

    #[test]
    fn delay_stays_within_jitter_window() {
        let pacer = Pacer::new(settings(2500, 1000));
        for _ in 0..200 {
            let d = pacer.delay();
            assert!(d >= Duration::from_millis(2500));
            assert!(d <= Duration::from_millis(3500));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let pacer = Pacer::new(settings(40, 0));
        assert_eq!(pacer.delay(), Duration::from_millis(40));
    }

    #[test]
    fn backoff_doubles_until_exhausted() {
        let pacer = Pacer::new(settings(2500, 0));
        assert_eq!(pacer.backoff(0).unwrap(), Duration::from_millis(2500));
        assert_eq!(pacer.backoff(1).unwrap(), Duration::from_millis(5000));
        assert_eq!(pacer.backoff(2).unwrap(), Duration::from_millis(10000));
        assert!(matches!(
            pacer.backoff(3),
            Err(IngestError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn back_off_sleeps_for_computed_duration() {
        let pacer = Pacer::new(settings(2500, 0));
        let start = tokio::time::Instant::now();
        pacer.back_off(1).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5000));
        assert!(elapsed < Duration::from_millis(5010));
    }
}
