// # mDNS Provider Trait
//
// Defines the interface to the daemon that performs the actual network
// advertisement.
//
// ## Implementations
//
// - mdns-sd: `svcreg-provider-mdns-sd` crate
// - Future: Avahi, Bonjour
//
// ## Usage
//
// ```rust,ignore
// use svcreg_core::{MdnsProvider, ServiceEntry};
//
// let client = provider.connect(listener.clone())?;
// // ... wait for ConnectionState::Running ...
// let mut group = client.create_group(listener)?;
// group.add_service(&ServiceEntry::from_record(&record, 24800))?;
// group.commit()?;
// ```

use crate::record::{ErrorCode, ServiceEntry};
use crate::traits::listener::RegistrationListener;
use std::sync::Arc;

/// Trait for mDNS/DNS-SD provider implementations
///
/// # Responsibilities
///
/// Providers own the daemon connection and entry-group commit mechanics.
/// They report progress only through the [`RegistrationListener`] they were
/// given and never retry on their own: reconnects, renames and backoff are
/// decided by [`ServiceRegistrar`](crate::ServiceRegistrar).
///
/// # Thread Safety
///
/// The provider is shared between the caller and the registrar worker, so it
/// must be `Send + Sync`.
pub trait MdnsProvider: Send + Sync {
    /// Open a connection to the daemon
    ///
    /// Connection state changes, including the initial `Running`, are
    /// delivered to `listener`. They may be delivered before this method
    /// returns.
    ///
    /// # Returns
    ///
    /// - `Ok(client)`: The open connection; dropping it closes the connection
    /// - `Err(code)`: The connection could not be created
    fn connect(
        &self,
        listener: Arc<dyn RegistrationListener>,
    ) -> Result<Box<dyn ProviderClient>, ErrorCode>;

    /// Generate an alternative for a name that collided
    ///
    /// The algorithm is provider-defined (typically a numeric suffix that
    /// increments on each call). It must return a name different from `name`.
    fn alternative_service_name(&self, name: &str) -> String;

    /// Map an error code to a human-readable string (diagnostics only)
    fn error_string(&self, code: ErrorCode) -> String;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// One open connection to the daemon
pub trait ProviderClient: Send {
    /// Create a new, empty entry group
    ///
    /// Group state changes are delivered to `listener`. Dropping the group
    /// frees it and withdraws anything it announced.
    fn create_group(
        &mut self,
        listener: Arc<dyn RegistrationListener>,
    ) -> Result<Box<dyn EntryGroup>, ErrorCode>;
}

/// A batch of entries committed to the daemon atomically
pub trait EntryGroup: Send {
    /// Whether the group has no entries (fresh or reset)
    fn is_empty(&self) -> bool;

    /// Add a service entry
    ///
    /// Fails with [`ErrorCode::COLLISION`] when the name is already in use
    /// locally.
    fn add_service(&mut self, entry: &ServiceEntry) -> Result<(), ErrorCode>;

    /// Commit the group; completion is reported via `on_group_state_changed`
    fn commit(&mut self) -> Result<(), ErrorCode>;

    /// Remove every entry, returning the group to the uncommitted state
    fn reset(&mut self);
}
