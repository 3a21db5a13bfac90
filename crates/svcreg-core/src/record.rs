//! Value types shared between the registrar and providers
//!
//! - [`ServiceRecord`]: what is being advertised
//! - [`ServiceEntry`]: one entry added to a provider entry group
//! - [`ErrorCode`]: opaque provider error code passed through to callers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Description of an advertised service
///
/// A plain value: the registrar copies it between its working (pending) and
/// committed (final) states, never sharing it by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Instance name shown to peers (e.g. "Workstation")
    pub service_name: String,

    /// DNS-SD service type (e.g. "_input._tcp")
    pub registered_type: String,

    /// Domain to register in; `None` uses the provider's default domain
    #[serde(default)]
    pub reply_domain: Option<String>,
}

impl ServiceRecord {
    /// Create a record in the provider's default domain
    pub fn new(service_name: impl Into<String>, registered_type: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            registered_type: registered_type.into(),
            reply_domain: None,
        }
    }

    /// Set the reply domain
    ///
    /// An empty string is treated the same as no domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        self.reply_domain = if domain.is_empty() { None } else { Some(domain) };
        self
    }

    /// The domain to hand to the provider, if one was requested
    pub fn domain(&self) -> Option<&str> {
        self.reply_domain.as_deref().filter(|d| !d.is_empty())
    }

    /// Copy of this record with a different instance name
    pub fn renamed(&self, service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.service_name,
            self.registered_type,
            self.domain().unwrap_or("local")
        )
    }
}

/// A single service entry added to an entry group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    pub service_type: String,
    pub domain: Option<String>,
    pub port: u16,
}

impl ServiceEntry {
    /// Build the entry for `record` on `port`
    pub fn from_record(record: &ServiceRecord, port: u16) -> Self {
        Self {
            name: record.service_name.clone(),
            service_type: record.registered_type.clone(),
            domain: record.domain().map(str::to_string),
            port,
        }
    }
}

/// Opaque provider error code
///
/// Codes are provider-defined. The constants below follow the Avahi numbering
/// and are the only values the registrar interprets itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// Generic failure
    pub const FAILURE: ErrorCode = ErrorCode(-1);

    /// Invalid domain name
    pub const INVALID_DOMAIN_NAME: ErrorCode = ErrorCode(-4);

    /// Name already in use
    pub const COLLISION: ErrorCode = ErrorCode(-8);

    /// Invalid service instance name
    pub const INVALID_SERVICE_NAME: ErrorCode = ErrorCode(-10);

    /// Invalid service type
    pub const INVALID_SERVICE_TYPE: ErrorCode = ErrorCode(-11);

    /// Connection to the daemon was lost
    pub const DISCONNECTED: ErrorCode = ErrorCode(-23);

    /// Out of memory or another resource
    pub const NO_MEMORY: ErrorCode = ErrorCode(-24);

    /// Raw numeric value
    pub fn code(self) -> i32 {
        self.0
    }

    /// Whether this code means the provider connection dropped
    pub fn is_disconnect(self) -> bool {
        self == Self::DISCONNECTED
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_domain_means_default() {
        let record = ServiceRecord::new("Workstation", "_input._tcp").with_domain("");
        assert_eq!(record.reply_domain, None);
        assert_eq!(record.domain(), None);
        assert_eq!(record.to_string(), "Workstation._input._tcp.local");
    }

    #[test]
    fn test_entry_from_record() {
        let record = ServiceRecord::new("Workstation", "_input._tcp").with_domain("example.org");
        let entry = ServiceEntry::from_record(&record, 24800);

        assert_eq!(entry.name, "Workstation");
        assert_eq!(entry.service_type, "_input._tcp");
        assert_eq!(entry.domain.as_deref(), Some("example.org"));
        assert_eq!(entry.port, 24800);
    }

    #[test]
    fn test_renamed_keeps_type_and_domain() {
        let record = ServiceRecord::new("Workstation", "_input._tcp").with_domain("example.org");
        let renamed = record.renamed("Workstation #2");

        assert_eq!(renamed.service_name, "Workstation #2");
        assert_eq!(renamed.registered_type, record.registered_type);
        assert_eq!(renamed.reply_domain, record.reply_domain);
    }

    #[test]
    fn test_record_deserializes_without_domain() {
        let record: ServiceRecord = serde_json::from_str(
            r#"{"service_name":"Workstation","registered_type":"_input._tcp"}"#,
        )
        .unwrap();
        assert_eq!(record, ServiceRecord::new("Workstation", "_input._tcp"));
    }

    #[test]
    fn test_disconnect_code() {
        assert!(ErrorCode::DISCONNECTED.is_disconnect());
        assert!(!ErrorCode::FAILURE.is_disconnect());
    }
}
