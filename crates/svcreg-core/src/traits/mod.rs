//! Provider boundary traits
//!
//! This module defines the interfaces between the registrar and the external
//! mDNS/DNS-SD daemon.
//!
//! - [`MdnsProvider`]: Open connections and generate alternative names
//! - [`ProviderClient`]: One open connection, creates entry groups
//! - [`EntryGroup`]: Batch of service entries committed atomically
//! - [`RegistrationListener`]: Typed callback sink for provider state changes

pub mod listener;
pub mod mdns_provider;

pub use listener::{ConnectionState, GroupState, RegistrationListener};
pub use mdns_provider::{EntryGroup, MdnsProvider, ProviderClient};
