// # mdns-sd Provider
//
// This crate provides an `MdnsProvider` backed by the pure-Rust `mdns-sd`
// daemon. No system daemon (Avahi, Bonjour) is required.
//
// ## Behavior
//
// - One `ServiceDaemon` per connection; dropping the client shuts it down
// - Connection states are reported synchronously from `connect`
// - Entries are announced on `<hostname>.local.` with addresses of every
//   enabled interface
// - Only the `local` domain is supported
// - Names already published through this provider are local collisions
// - NO retry or rename logic (owned by ServiceRegistrar)
//
// ## Limitations
//
// `mdns-sd` resolves probe conflicts internally and never reports a remote
// name collision, so `GroupState::Collision` is not emitted by this provider.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use svcreg_core::traits::{
    ConnectionState, EntryGroup, GroupState, MdnsProvider, ProviderClient, RegistrationListener,
};
use svcreg_core::{Error, ErrorCode, Result, ServiceEntry};

/// Domain suffix used by multicast DNS
const LOCAL_DOMAIN: &str = "local.";

/// Full names published through one provider, shared by all its groups
type Published = Arc<Mutex<HashSet<String>>>;

/// mDNS provider built on `mdns_sd::ServiceDaemon`
///
/// # Example
///
/// ```rust,ignore
/// use svcreg_provider_mdns_sd::MdnsSdProvider;
///
/// let provider = MdnsSdProvider::new()?;
/// let (registrar, events) = ServiceRegistrar::new(Arc::new(provider), config)?;
/// ```
#[derive(Debug, Clone)]
pub struct MdnsSdProvider {
    host_name: String,
    published: Published,
}

impl MdnsSdProvider {
    /// Create a provider advertising on this machine's host name
    ///
    /// # Errors
    ///
    /// Returns a provider error if the host name cannot be read.
    pub fn new() -> Result<Self> {
        let host = hostname::get()
            .map_err(|e| Error::provider("mdns-sd", format!("Failed to read host name: {}", e)))?;
        Ok(Self::with_host_name(host.to_string_lossy()))
    }

    /// Create a provider advertising on the given host name
    ///
    /// The name is normalized to `<host>.local.`.
    pub fn with_host_name(host: impl AsRef<str>) -> Self {
        Self {
            host_name: normalize_host_name(host.as_ref()),
            published: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The fully-qualified host name records point at
    pub fn host_name(&self) -> &str {
        &self.host_name
    }
}

impl MdnsProvider for MdnsSdProvider {
    fn connect(
        &self,
        listener: Arc<dyn RegistrationListener>,
    ) -> std::result::Result<Box<dyn ProviderClient>, ErrorCode> {
        listener.on_connection_state_changed(ConnectionState::Connecting);

        let daemon = ServiceDaemon::new().map_err(|e| {
            tracing::error!(error = %e, "Failed to start mDNS daemon");
            ErrorCode::FAILURE
        })?;

        tracing::debug!(host = %self.host_name, "mDNS daemon started");
        listener.on_connection_state_changed(ConnectionState::Running);

        Ok(Box::new(MdnsSdClient {
            daemon,
            host_name: self.host_name.clone(),
            published: self.published.clone(),
        }))
    }

    fn alternative_service_name(&self, name: &str) -> String {
        alternative_name(name)
    }

    fn error_string(&self, code: ErrorCode) -> String {
        describe(code).to_string()
    }

    fn provider_name(&self) -> &'static str {
        "mdns-sd"
    }
}

/// An open `ServiceDaemon`
struct MdnsSdClient {
    daemon: ServiceDaemon,
    host_name: String,
    published: Published,
}

impl ProviderClient for MdnsSdClient {
    fn create_group(
        &mut self,
        listener: Arc<dyn RegistrationListener>,
    ) -> std::result::Result<Box<dyn EntryGroup>, ErrorCode> {
        Ok(Box::new(MdnsSdGroup {
            daemon: self.daemon.clone(),
            host_name: self.host_name.clone(),
            published: self.published.clone(),
            listener,
            pending: Vec::new(),
            committed: Vec::new(),
        }))
    }
}

impl Drop for MdnsSdClient {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::warn!(error = %e, "Failed to shut down mDNS daemon");
        }
    }
}

struct MdnsSdGroup {
    daemon: ServiceDaemon,
    host_name: String,
    published: Published,
    listener: Arc<dyn RegistrationListener>,
    /// Added but not yet committed
    pending: Vec<ServiceInfo>,
    /// Full names registered with the daemon
    committed: Vec<String>,
}

impl MdnsSdGroup {
    fn is_taken(&self, fullname: &str) -> bool {
        self.pending.iter().any(|info| info.get_fullname() == fullname)
            || self
                .published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(fullname)
    }

    fn withdraw(&mut self) {
        self.pending.clear();

        let mut published = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for fullname in self.committed.drain(..) {
            published.remove(&fullname);
            match self.daemon.unregister(&fullname) {
                Ok(_) => tracing::debug!(service = %fullname, "Unregistered mDNS service"),
                Err(e) => tracing::warn!(
                    service = %fullname,
                    error = %e,
                    "Failed to unregister mDNS service"
                ),
            }
        }
    }
}

impl EntryGroup for MdnsSdGroup {
    fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.committed.is_empty()
    }

    fn add_service(&mut self, entry: &ServiceEntry) -> std::result::Result<(), ErrorCode> {
        let info = service_info(entry, &self.host_name)?;

        if self.is_taken(info.get_fullname()) {
            tracing::debug!(service = %info.get_fullname(), "Name already published locally");
            return Err(ErrorCode::COLLISION);
        }

        self.pending.push(info);
        Ok(())
    }

    fn commit(&mut self) -> std::result::Result<(), ErrorCode> {
        self.listener
            .on_group_state_changed(GroupState::Registering);

        let mut registered = Vec::new();
        let daemon = &self.daemon;
        let result = register_pending(&mut self.pending, &mut registered, |info| {
            daemon.register(info.clone())
        });

        {
            let mut published = self
                .published
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for fullname in &registered {
                tracing::info!(service = %fullname, "Registered mDNS service");
                published.insert(fullname.clone());
            }
        }
        self.committed.extend(registered);

        if let Err(e) = result {
            tracing::error!(
                error = %e,
                remaining = self.pending.len(),
                "Failed to register mDNS service"
            );
            return Err(ErrorCode::FAILURE);
        }

        self.listener
            .on_group_state_changed(GroupState::Established);
        Ok(())
    }

    fn reset(&mut self) {
        self.withdraw();
        self.listener
            .on_group_state_changed(GroupState::Uncommitted);
    }
}

impl Drop for MdnsSdGroup {
    fn drop(&mut self) {
        self.withdraw();
    }
}

/// Build the `ServiceInfo` advertised for `entry`
fn service_info(entry: &ServiceEntry, host_name: &str) -> std::result::Result<ServiceInfo, ErrorCode> {
    if let Some(domain) = entry.domain.as_deref()
        && domain.trim_end_matches('.') != LOCAL_DOMAIN.trim_end_matches('.')
    {
        tracing::warn!(domain = %domain, "mdns-sd only advertises in the local domain");
        return Err(ErrorCode::INVALID_DOMAIN_NAME);
    }

    if entry.name.is_empty() {
        return Err(ErrorCode::INVALID_SERVICE_NAME);
    }

    let ty_domain = format!("{}.{}", entry.service_type.trim_end_matches('.'), LOCAL_DOMAIN);

    ServiceInfo::new(
        &ty_domain,
        &entry.name,
        host_name,
        "",
        entry.port,
        HashMap::<String, String>::new(),
    )
    .map(ServiceInfo::enable_addr_auto)
    .map_err(|e| {
        tracing::warn!(service_type = %ty_domain, error = %e, "Invalid service description");
        ErrorCode::INVALID_SERVICE_TYPE
    })
}

/// Register `pending` entries in order, moving each full name to `registered`
///
/// Stops at the first failure; that entry and the ones after it stay pending.
fn register_pending<E>(
    pending: &mut Vec<ServiceInfo>,
    registered: &mut Vec<String>,
    mut register: impl FnMut(&ServiceInfo) -> std::result::Result<(), E>,
) -> std::result::Result<(), E> {
    while let Some(info) = pending.first() {
        register(info)?;
        registered.push(info.get_fullname().to_string());
        pending.remove(0);
    }
    Ok(())
}

/// `"Name"` becomes `"Name #2"`, `"Name #2"` becomes `"Name #3"`
fn alternative_name(name: &str) -> String {
    if let Some((base, suffix)) = name.rsplit_once(" #")
        && let Ok(n) = suffix.parse::<u32>()
    {
        return format!("{} #{}", base, n.saturating_add(1));
    }
    format!("{} #2", name)
}

fn normalize_host_name(host: &str) -> String {
    let host = host.trim_end_matches('.');
    let host = host.strip_suffix(".local").unwrap_or(host);
    format!("{}.{}", host, LOCAL_DOMAIN)
}

fn describe(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::FAILURE => "Operation failed",
        ErrorCode::INVALID_DOMAIN_NAME => "Invalid domain name",
        ErrorCode::COLLISION => "Local name collision",
        ErrorCode::INVALID_SERVICE_NAME => "Invalid service name",
        ErrorCode::INVALID_SERVICE_TYPE => "Invalid service type",
        ErrorCode::DISCONNECTED => "Daemon connection failed",
        ErrorCode::NO_MEMORY => "Not enough memory",
        _ => "Unknown error",
    }
}
