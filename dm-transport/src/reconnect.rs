//! Transport reconnection with banded backoff
//!
//! Reconnect attempts are spaced by a delay that escalates in four bands as
//! consecutive failures accumulate:
//!
//! | failures so far | delay  |
//! |-----------------|--------|
//! | 0 - 4           | 1 s    |
//! | 5 - 9           | 10 s   |
//! | 10 - 19         | 1 min  |
//! | 20+             | 5 min  |
//!
//! The policy only governs transport reconnects; request timeouts are fixed
//! per call and unaffected.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::transport::Transport;

/// One escalation band: from `after_failures` onward, wait `delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffBand {
    pub after_failures: u32,
    pub delay: Duration,
}

/// Four-band reconnect backoff policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    bands: [BackoffBand; 4],
}

impl ReconnectPolicy {
    /// Build a policy from four bands; see [`ReconnectPolicy::validate`]
    pub fn new(bands: [BackoffBand; 4]) -> Self {
        Self { bands }
    }

    /// A policy that retries immediately, for tests
    pub fn immediate() -> Self {
        Self::new([
            BackoffBand { after_failures: 0, delay: Duration::ZERO },
            BackoffBand { after_failures: 5, delay: Duration::ZERO },
            BackoffBand { after_failures: 10, delay: Duration::ZERO },
            BackoffBand { after_failures: 20, delay: Duration::ZERO },
        ])
    }

    pub fn bands(&self) -> &[BackoffBand; 4] {
        &self.bands
    }

    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.bands
            .iter()
            .rev()
            .find(|band| failures >= band.after_failures)
            .map(|band| band.delay)
            .unwrap_or(self.bands[0].delay)
    }

    /// Index of the band in effect after `failures` failures
    pub fn band_index(&self, failures: u32) -> usize {
        self.bands
            .iter()
            .rposition(|band| failures >= band.after_failures)
            .unwrap_or(0)
    }

    /// Thresholds must start at zero and strictly increase; delays must not shrink
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.bands[0].after_failures != 0 {
            return Err("first backoff band must start at 0 failures".to_string());
        }
        for pair in self.bands.windows(2) {
            if pair[1].after_failures <= pair[0].after_failures {
                return Err(format!(
                    "backoff thresholds must increase ({} then {})",
                    pair[0].after_failures, pair[1].after_failures
                ));
            }
            if pair[1].delay < pair[0].delay {
                return Err("backoff delays must not decrease".to_string());
            }
        }
        Ok(())
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new([
            BackoffBand { after_failures: 0, delay: Duration::from_secs(1) },
            BackoffBand { after_failures: 5, delay: Duration::from_secs(10) },
            BackoffBand { after_failures: 10, delay: Duration::from_secs(60) },
            BackoffBand { after_failures: 20, delay: Duration::from_secs(300) },
        ])
    }
}

// ============================================================================
// Reconnector
// ============================================================================

/// Something that can attempt to (re)establish a connection
#[cfg_attr(test, mockall::automock)]
pub trait Connector {
    fn try_connect(&self) -> Result<()>;
}

impl<T: Transport + ?Sized> Connector for T {
    fn try_connect(&self) -> Result<()> {
        self.connect()
    }
}

/// Drives reconnect attempts according to a [`ReconnectPolicy`]
pub struct Reconnector {
    policy: ReconnectPolicy,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }

    /// Retry `connector` until it succeeds or `cancel` fires
    ///
    /// Waits are interruptible: a message on `cancel`, or all its senders
    /// being dropped, aborts the loop with [`TransportError::Cancelled`].
    /// Returns the number of failed attempts before success.
    pub fn run<C: Connector + ?Sized>(&self, connector: &C, cancel: &Receiver<()>) -> Result<u32> {
        let mut failures: u32 = 0;
        loop {
            match connector.try_connect() {
                Ok(()) => {
                    info!("Reconnected after {} failed attempt(s)", failures);
                    return Ok(failures);
                }
                Err(e) => {
                    let previous_band = self.policy.band_index(failures);
                    failures = failures.saturating_add(1);
                    let band = self.policy.band_index(failures);
                    let delay = self.policy.delay_for(failures);
                    if band != previous_band {
                        warn!(
                            "{} consecutive reconnect failures, backing off to {:?} between attempts",
                            failures, delay
                        );
                    }
                    debug!("Reconnect attempt {} failed: {}", failures, e);

                    match cancel.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            debug!("Reconnect cancelled after {} attempt(s)", failures);
                            return Err(TransportError::Cancelled);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use mockall::Sequence;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(4, 1)]
    #[case(5, 10)]
    #[case(9, 10)]
    #[case(10, 60)]
    #[case(19, 60)]
    #[case(20, 300)]
    #[case(1000, 300)]
    fn test_default_bands(#[case] failures: u32, #[case] secs: u64) {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(failures), Duration::from_secs(secs));
    }

    #[test]
    fn test_default_policy_is_valid() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        assert!(ReconnectPolicy::immediate().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unordered_thresholds() {
        let mut bands = *ReconnectPolicy::default().bands();
        bands[2].after_failures = 5;
        assert!(ReconnectPolicy::new(bands).validate().is_err());

        let mut bands = *ReconnectPolicy::default().bands();
        bands[0].after_failures = 1;
        assert!(ReconnectPolicy::new(bands).validate().is_err());

        let mut bands = *ReconnectPolicy::default().bands();
        bands[3].delay = Duration::from_secs(2);
        assert!(ReconnectPolicy::new(bands).validate().is_err());
    }

    #[test]
    fn test_reconnector_retries_until_success() {
        let mut connector = MockConnector::new();
        let mut seq = Sequence::new();
        connector
            .expect_try_connect()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|| Err(TransportError::ConnectFailed("refused".to_string())));
        connector
            .expect_try_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let (_cancel_tx, cancel_rx) = bounded::<()>(1);
        let failures = Reconnector::new(ReconnectPolicy::immediate())
            .run(&connector, &cancel_rx)
            .unwrap();
        assert_eq!(failures, 3);
    }

    #[test]
    fn test_reconnector_cancel() {
        let mut connector = MockConnector::new();
        connector
            .expect_try_connect()
            .times(1)
            .returning(|| Err(TransportError::ConnectFailed("refused".to_string())));

        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        cancel_tx.send(()).unwrap();
        let result = Reconnector::new(ReconnectPolicy::default()).run(&connector, &cancel_rx);
        assert_eq!(result, Err(TransportError::Cancelled));
    }
}
