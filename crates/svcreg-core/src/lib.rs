// # svcreg-core
//
// Core library for advertising a network endpoint over mDNS/DNS-SD.
//
// ## Architecture Overview
//
// - **ServiceRecord**: Value describing what is advertised (name, type, domain)
// - **MdnsProvider**: Trait for the external mDNS daemon (connection, entry groups, naming)
// - **ReconnectScheduler**: Single-shot cancellable delayed task
// - **ServiceRegistrar**: State machine turning provider callbacks into a registration lifecycle
//
// ## Design Principles
//
// 1. **Provider Isolation**: Network advertisement lives behind `MdnsProvider`
// 2. **Single Queue**: Every provider callback and timer is handled on one worker
// 3. **Event-Driven**: Callers observe progress through `RegistrarEvent`s on a channel
// 4. **Library-First**: The daemon is a thin wrapper around this crate

pub mod config;
pub mod error;
pub mod record;
pub mod registrar;
pub mod scheduler;
pub mod traits;

// Re-export core types for convenience
pub use config::{RegistrarConfig, ServiceConfig};
pub use error::{Error, Result};
pub use record::{ErrorCode, ServiceEntry, ServiceRecord};
pub use registrar::{RegistrarEvent, RegistrationStatus, ServiceRegistrar};
pub use scheduler::ReconnectScheduler;
pub use traits::{
    ConnectionState, EntryGroup, GroupState, MdnsProvider, ProviderClient, RegistrationListener,
};
