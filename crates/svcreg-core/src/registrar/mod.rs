//! Service registrar
//!
//! The ServiceRegistrar is responsible for:
//! - Opening a provider connection on a dedicated worker
//! - Creating and committing an entry group once the daemon is running
//! - Renaming and retrying on name collisions
//! - Reconnecting after the daemon drops the connection
//! - Reporting `Registered` / `Error` events to the caller
//!
//! ## Architecture
//!
//! ```text
//!  caller thread                      worker thread (tokio current-thread)
//! ┌──────────────────┐  Shutdown     ┌──────────────────────────────────┐
//! │ ServiceRegistrar │──────────────▶│ Worker                           │
//! │  register_service│               │  connection / group / schedulers │
//! │  reset           │◀── events ────│                                  │
//! │  registered_record (RwLock)      └──────────────────────────────────┘
//! └──────────────────┘                      ▲ Command queue
//!                                           │
//!                              ┌────────────┴───────────┐
//!                              │ MdnsProvider callbacks │
//!                              └────────────────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. `register_service` spawns the worker, which connects to the provider
//! 2. Provider reports `Running`; the worker creates and commits an entry group
//! 3. Provider reports `Established`; the worker emits `Registered`
//! 4. On collision the worker renames the record and commits again
//! 5. On disconnect the worker reconnects after a fixed delay

mod worker;

use crate::config::RegistrarConfig;
use crate::error::Result;
use crate::record::{ErrorCode, ServiceRecord};
use crate::traits::MdnsProvider;
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use worker::{Command, RegistrationAttempt, Worker};

/// Events emitted by the ServiceRegistrar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrarEvent {
    /// The service is established under this (possibly renamed) record
    Registered(ServiceRecord),

    /// Registration failed; the code is provider-defined
    Error(ErrorCode),
}

/// Snapshot of the registrar's progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationStatus {
    /// Whether a registration session is running
    pub active: bool,
    /// Last successfully registered record
    pub registered_record: Option<ServiceRecord>,
    /// When `registered_record` was established
    pub registered_at: Option<DateTime<Utc>>,
    /// Number of `Registered` events emitted
    pub registrations: u64,
    /// Number of reconnects performed after a disconnect
    pub reconnects: u64,
}

/// State written by the worker and read from the caller's thread
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub final_record: Option<ServiceRecord>,
    /// Whether the worker holds an open provider connection
    pub connected: bool,
    pub registered_at: Option<DateTime<Utc>>,
    pub registrations: u64,
    pub reconnects: u64,
}

/// A running registration session
struct Session {
    commands: mpsc::UnboundedSender<Command>,
    thread: JoinHandle<()>,
}

/// mDNS/DNS-SD service registrar
///
/// Advertises one service at a time through an [`MdnsProvider`].
///
/// ## Lifecycle
///
/// 1. Create with [`ServiceRegistrar::new()`]
/// 2. Start with [`ServiceRegistrar::register_service()`]
/// 3. Observe [`RegistrarEvent`]s on the returned receiver
/// 4. Stop with [`ServiceRegistrar::reset()`] (also done on drop)
///
/// ## Threading
///
/// Each session runs on its own worker thread. Provider callbacks and timers
/// are handled there, sequentially. `reset()` joins the worker, so no
/// callback runs after it returns.
pub struct ServiceRegistrar {
    provider: Arc<dyn MdnsProvider>,
    config: RegistrarConfig,
    shared: Arc<RwLock<SharedState>>,
    events: mpsc::Sender<RegistrarEvent>,
    session: Option<Session>,
}

impl ServiceRegistrar {
    /// Create a new registrar
    ///
    /// # Parameters
    ///
    /// - `provider`: mDNS provider implementation
    /// - `config`: Registrar configuration
    ///
    /// # Returns
    ///
    /// A tuple of (registrar, event_receiver) where event_receiver yields registrar events
    pub fn new(
        provider: Arc<dyn MdnsProvider>,
        config: RegistrarConfig,
    ) -> Result<(Self, mpsc::Receiver<RegistrarEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let registrar = Self {
            provider,
            config,
            shared: Arc::new(RwLock::new(SharedState::default())),
            events: tx,
            session: None,
        };

        Ok((registrar, rx))
    }

    /// Start advertising `record` on `port`
    ///
    /// Returns once the worker is running and the provider connection is open;
    /// everything after that is reported through events.
    ///
    /// If a session is already active the call is ignored (logged only),
    /// unless that session failed to reconnect and holds no connection; it is
    /// then reset and replaced.
    ///
    /// If the worker or the connection cannot be created, an `Error` event is
    /// emitted and the registrar is reset.
    pub fn register_service(&mut self, record: ServiceRecord, port: u16) {
        if self.session.is_some() {
            if self.is_connected() {
                warn!(
                    "Already registered a service for this registrar, ignoring '{}'",
                    record
                );
                return;
            }

            debug!("Previous session lost its provider connection, replacing it");
            self.reset();
        }

        info!("Registering '{}' on port {}", record, port);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let attempt = RegistrationAttempt {
            pending_record: record,
            service_port: port,
            needs_reconnect: false,
            collision_retries: 0,
        };
        let worker = Worker::new(
            self.provider.clone(),
            self.config.clone(),
            attempt,
            self.shared.clone(),
            self.events.clone(),
            command_tx.clone(),
        );

        let spawned = std::thread::Builder::new()
            .name("svcreg-worker".to_string())
            .spawn(move || worker.run(command_rx, ready_tx));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                error!("Failed to start registrar worker: {}", e);
                self.emit(RegistrarEvent::Error(ErrorCode::NO_MEMORY));
                return;
            }
        };

        self.session = Some(Session {
            commands: command_tx,
            thread,
        });

        match ready_rx.recv() {
            Ok(Ok(())) => debug!("Registrar worker started"),
            Ok(Err(code)) => {
                error!(
                    "Failed to create {} client: {}",
                    self.provider.provider_name(),
                    self.provider.error_string(code)
                );
                self.emit(RegistrarEvent::Error(code));
                self.reset();
            }
            Err(_) => {
                error!("Registrar worker exited during startup");
                self.emit(RegistrarEvent::Error(ErrorCode::FAILURE));
                self.reset();
            }
        }
    }

    /// Stop the session and release the entry group, connection and worker
    ///
    /// Blocks until the worker has exited. Safe to call repeatedly.
    pub fn reset(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        debug!("Resetting registrar");

        // Fails only if the worker already exited
        let _ = session.commands.send(Command::Shutdown);

        if session.thread.join().is_err() {
            error!("Registrar worker panicked");
        }
    }

    /// Last successfully registered record
    ///
    /// `None` until the first `Registered` event.
    pub fn registered_record(&self) -> Option<ServiceRecord> {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .final_record
            .clone()
    }

    /// Whether a registration session is running
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Snapshot of the registrar's progress
    pub fn status(&self) -> RegistrationStatus {
        let shared = self.shared.read().unwrap_or_else(PoisonError::into_inner);

        RegistrationStatus {
            active: self.is_active(),
            registered_record: shared.final_record.clone(),
            registered_at: shared.registered_at,
            registrations: shared.registrations,
            reconnects: shared.reconnects,
        }
    }

    fn is_connected(&self) -> bool {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
    }

    fn emit(&self, event: RegistrarEvent) {
        if self.events.try_send(event).is_err() {
            warn!("Event channel full or closed, dropping registrar event");
        }
    }
}

impl Drop for ServiceRegistrar {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_equality() {
        let record = ServiceRecord::new("Workstation", "_input._tcp");
        let event = RegistrarEvent::Registered(record.clone());

        assert_eq!(event.clone(), event);
        assert_ne!(event, RegistrarEvent::Error(ErrorCode::FAILURE));
    }

    #[test]
    fn test_default_status() {
        let status = RegistrationStatus::default();
        assert!(!status.active);
        assert_eq!(status.registered_record, None);
        assert_eq!(status.registrations, 0);
    }
}
