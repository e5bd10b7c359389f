//! Configuration for the managed client
//!
//! Controls the session lifetime, declared capabilities, request timeouts,
//! renewal retries, dispatcher queues and transport reconnect backoff.

use std::time::Duration;

use dm_transport::{QoS, ReconnectPolicy};

use crate::error::DmError;

/// Smallest non-zero session lifetime the server accepts
pub const MIN_LIFETIME: Duration = Duration::from_secs(3600);

/// How long before the session deadline a renewal is sent
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(120);

/// Configuration for [`crate::ManagedClient`]
#[derive(Debug, Clone)]
pub struct ManagedClientConfig {
    /// Session lifetime requested in the manage request; zero never expires
    /// Default: 3600 seconds
    pub lifetime: Duration,

    /// Declare support for reboot / factory reset
    /// Default: false (also declared when a device-action handler is registered)
    pub supports_device_actions: bool,

    /// Declare support for firmware download / update
    /// Default: false (also declared when a firmware handler is registered)
    pub supports_firmware_actions: bool,

    /// Time to wait for the response to each correlated request
    /// Default: 120 seconds
    pub request_timeout: Duration,

    /// Renewal attempts before the session is considered expired
    /// Default: 3
    pub renewal_retry_attempts: u32,

    /// Base delay for exponential backoff between renewal attempts
    /// Default: 2 seconds
    pub renewal_retry_backoff: Duration,

    /// Bounded queue length of each action dispatcher
    /// Default: 16
    pub dispatcher_queue_capacity: usize,

    /// Bounded wait for dispatcher workers to stop
    /// Default: 5 seconds
    pub shutdown_timeout: Duration,

    /// Delivery guarantee for management topics; must be at least once
    /// Default: AtLeastOnce
    pub qos: QoS,

    /// Transport reconnect backoff
    pub reconnect: ReconnectPolicy,
}

impl Default for ManagedClientConfig {
    fn default() -> Self {
        Self {
            lifetime: MIN_LIFETIME,
            supports_device_actions: false,
            supports_firmware_actions: false,
            request_timeout: Duration::from_secs(120),
            renewal_retry_attempts: 3,
            renewal_retry_backoff: Duration::from_secs(2),
            dispatcher_queue_capacity: 16,
            shutdown_timeout: Duration::from_secs(5),
            qos: QoS::AtLeastOnce,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ManagedClientConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeouts and immediate reconnects, for tests and local simulation
    pub fn fast() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            renewal_retry_backoff: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(2),
            reconnect: ReconnectPolicy::immediate(),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), DmError> {
        validate_lifetime(self.lifetime)?;

        if self.request_timeout.is_zero() {
            return Err(DmError::Config(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.renewal_retry_attempts == 0 {
            return Err(DmError::Config(
                "renewal_retry_attempts must be greater than 0".to_string(),
            ));
        }

        if self.dispatcher_queue_capacity == 0 {
            return Err(DmError::Config(
                "dispatcher_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(DmError::Config(
                "shutdown_timeout must be greater than 0".to_string(),
            ));
        }

        if self.qos < QoS::AtLeastOnce {
            return Err(DmError::Config(
                "management topics require at-least-once delivery".to_string(),
            ));
        }

        self.reconnect.validate().map_err(DmError::Config)?;

        Ok(())
    }

    /// Set the session lifetime
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the declared capabilities
    pub fn with_capabilities(mut self, device_actions: bool, firmware_actions: bool) -> Self {
        self.supports_device_actions = device_actions;
        self.supports_firmware_actions = firmware_actions;
        self
    }

    /// Set the per-request response timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set renewal retry attempts and backoff base
    pub fn with_renewal_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.renewal_retry_attempts = attempts;
        self.renewal_retry_backoff = backoff;
        self
    }

    /// Set the dispatcher queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.dispatcher_queue_capacity = capacity;
        self
    }

    /// Set the bounded wait for stopping dispatcher workers
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the reconnect backoff policy
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// A lifetime is either zero (never expires) or at least [`MIN_LIFETIME`]
pub fn validate_lifetime(lifetime: Duration) -> Result<(), DmError> {
    if !lifetime.is_zero() && lifetime < MIN_LIFETIME {
        return Err(DmError::InvalidLifetime(lifetime.as_secs()));
    }
    Ok(())
}

/// Delay until the next renewal for a session of `lifetime`
///
/// Renewal happens [`RENEWAL_MARGIN`] before the deadline. Lifetimes no longer
/// than the margin renew at half their length instead of immediately.
pub fn renewal_delay(lifetime: Duration) -> Duration {
    if lifetime > RENEWAL_MARGIN {
        lifetime - RENEWAL_MARGIN
    } else {
        lifetime / 2
    }
}
