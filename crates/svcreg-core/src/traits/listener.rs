// # Registration Listener
//
// Typed callback interface through which a provider reports state changes.
//
// Providers call these methods from whatever thread their daemon runs on.
// The registrar's implementation only enqueues the state onto its worker,
// so calls are cheap and never re-enter the provider.

use crate::record::ErrorCode;

/// State of the connection to the mDNS daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is being established
    Connecting,
    /// Daemon is (re-)registering its own host records
    Registering,
    /// Daemon is running and ready for entry groups
    Running,
    /// Daemon host name collided; wait for the next `Running`
    Collision,
    /// Connection failed; the code carries the reason
    Failure(ErrorCode),
}

/// State of an entry group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Group has not been committed yet
    Uncommitted,
    /// Commit is in progress
    Registering,
    /// Every entry in the group is announced
    Established,
    /// A remote service already uses one of the names
    Collision,
    /// Group failed; the code carries the reason
    Failure(ErrorCode),
}

/// Listener bound to one registrar connection
///
/// Passed to [`MdnsProvider::connect`](super::MdnsProvider::connect) and
/// [`ProviderClient::create_group`](super::ProviderClient::create_group).
///
/// # Thread Safety
///
/// Implementations must accept calls from any thread, including from inside
/// a provider method that the registrar itself is executing.
pub trait RegistrationListener: Send + Sync {
    /// Called whenever the connection state changes
    fn on_connection_state_changed(&self, state: ConnectionState);

    /// Called whenever the state of an entry group changes
    fn on_group_state_changed(&self, state: GroupState);
}
