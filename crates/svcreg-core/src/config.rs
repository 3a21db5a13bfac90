//! Configuration types for service registration
//!
//! - [`RegistrarConfig`]: retry and delivery policy of the registrar
//! - [`ServiceConfig`]: the service to advertise

use crate::record::ServiceRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum length of a DNS label (RFC 1035)
const MAX_LABEL_LEN: usize = 63;

/// Registrar policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Delay before reconnecting after the daemon disconnects (in milliseconds)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum renames attempted for one registration before giving up
    #[serde(default = "default_max_collision_retries")]
    pub max_collision_retries: u32,

    /// Base backoff before re-committing after a remote collision (in milliseconds)
    ///
    /// Doubled on each consecutive collision. Set to 0 to retry immediately.
    #[serde(default = "default_collision_backoff_ms")]
    pub collision_backoff_ms: u64,

    /// Upper bound for the collision backoff (in milliseconds)
    #[serde(default = "default_max_collision_backoff_ms")]
    pub max_collision_backoff_ms: u64,

    /// Capacity of the event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl RegistrarConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        if self.collision_backoff_ms > self.max_collision_backoff_ms {
            return Err(crate::Error::config(format!(
                "Collision backoff ({}ms) exceeds its maximum ({}ms)",
                self.collision_backoff_ms, self.max_collision_backoff_ms
            )));
        }

        Ok(())
    }

    /// Reconnect delay as a [`Duration`]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Backoff before the `retry`-th re-commit after a remote collision
    ///
    /// `retry` starts at 1.
    pub fn collision_backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        let backoff = self.collision_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(backoff.min(self.max_collision_backoff_ms))
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_collision_retries: default_max_collision_retries(),
            collision_backoff_ms: default_collision_backoff_ms(),
            max_collision_backoff_ms: default_max_collision_backoff_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_collision_retries() -> u32 {
    10
}

fn default_collision_backoff_ms() -> u64 {
    100
}

fn default_max_collision_backoff_ms() -> u64 {
    5000
}

fn default_event_channel_capacity() -> usize {
    64
}

/// Service advertisement configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Instance name (e.g. the host name)
    pub name: String,

    /// DNS-SD service type (e.g. "_input._tcp")
    pub service_type: String,

    /// Domain to register in (empty or absent for the provider default)
    #[serde(default)]
    pub domain: Option<String>,

    /// Port the advertised service listens on
    pub port: u16,
}

impl ServiceConfig {
    /// Create a new service configuration
    pub fn new(name: impl Into<String>, service_type: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            domain: None,
            port,
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, crate::Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::config("Service name cannot be empty"));
        }

        if self.name.len() > MAX_LABEL_LEN {
            return Err(crate::Error::config(format!(
                "Service name too long: {} bytes (max {})",
                self.name.len(),
                MAX_LABEL_LEN
            )));
        }

        validate_service_type(&self.service_type)?;

        if self.port == 0 {
            return Err(crate::Error::config("Service port must be > 0"));
        }

        Ok(())
    }

    /// The record to register
    pub fn record(&self) -> ServiceRecord {
        let record = ServiceRecord::new(self.name.clone(), self.service_type.clone());
        match &self.domain {
            Some(domain) => record.with_domain(domain.clone()),
            None => record,
        }
    }
}

/// Validate a DNS-SD service type of the form `_service._tcp` or `_service._udp`
fn validate_service_type(service_type: &str) -> Result<(), crate::Error> {
    let Some((service, proto)) = service_type.split_once('.') else {
        return Err(crate::Error::config(format!(
            "Service type must look like '_name._tcp'. Got: '{}'",
            service_type
        )));
    };

    if proto != "_tcp" && proto != "_udp" {
        return Err(crate::Error::config(format!(
            "Service type protocol must be _tcp or _udp. Got: '{}'",
            proto
        )));
    }

    let label = service.strip_prefix('_').unwrap_or_default();
    if label.is_empty() || label.len() > 15 {
        return Err(crate::Error::config(format!(
            "Service type label must be 1-15 characters after '_'. Got: '{}'",
            service
        )));
    }

    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        || label.starts_with('-')
        || label.ends_with('-')
    {
        return Err(crate::Error::config(format!(
            "Service type label contains invalid characters. Got: '{}'",
            service
        )));
    }

    Ok(())
}
