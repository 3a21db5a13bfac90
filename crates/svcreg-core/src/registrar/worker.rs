//! Registrar worker
//!
//! The worker is the registrar's execution context: a dedicated thread running
//! a current-thread tokio runtime. It owns the provider connection, the entry
//! group and both schedulers, and processes every provider callback and timer
//! from a single command queue, one at a time.

use super::{RegistrarEvent, SharedState};
use crate::config::RegistrarConfig;
use crate::record::{ErrorCode, ServiceEntry, ServiceRecord};
use crate::scheduler::ReconnectScheduler;
use crate::traits::{
    ConnectionState, EntryGroup, GroupState, MdnsProvider, ProviderClient, RegistrationListener,
};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Work items processed by the worker
#[derive(Debug)]
pub(crate) enum Command {
    /// Provider connection state changed
    ConnectionState { generation: u64, state: ConnectionState },
    /// Entry group state changed
    GroupState { generation: u64, state: GroupState },
    /// Reconnect delay expired
    Reconnect,
    /// Collision backoff expired
    Repopulate { generation: u64 },
    /// Release everything and stop
    Shutdown,
}

/// Working state of one registration session
#[derive(Debug)]
pub(crate) struct RegistrationAttempt {
    /// Working copy, renamed on collision
    pub pending_record: ServiceRecord,
    /// Fixed for the lifetime of the session
    pub service_port: u16,
    /// Set on disconnect, cleared when the reconnect fires
    pub needs_reconnect: bool,
    /// Renames since the last successful establishment
    pub collision_retries: u32,
}

/// Listener handed to the provider
///
/// Forwards callbacks onto the worker queue, tagged with the connection
/// generation they belong to.
struct CallbackForwarder {
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl RegistrationListener for CallbackForwarder {
    fn on_connection_state_changed(&self, state: ConnectionState) {
        let command = Command::ConnectionState {
            generation: self.generation,
            state,
        };
        if self.commands.send(command).is_err() {
            trace!("Registrar stopped, dropping connection state {:?}", state);
        }
    }

    fn on_group_state_changed(&self, state: GroupState) {
        let command = Command::GroupState {
            generation: self.generation,
            state,
        };
        if self.commands.send(command).is_err() {
            trace!("Registrar stopped, dropping group state {:?}", state);
        }
    }
}

/// Registration state machine
pub(crate) struct Worker {
    provider: Arc<dyn MdnsProvider>,
    config: RegistrarConfig,
    attempt: RegistrationAttempt,
    shared: Arc<RwLock<SharedState>>,
    events: mpsc::Sender<RegistrarEvent>,
    commands: mpsc::UnboundedSender<Command>,

    /// Incremented for every new provider connection
    generation: u64,
    listener: Option<Arc<dyn RegistrationListener>>,
    client: Option<Box<dyn ProviderClient>>,
    group: Option<Box<dyn EntryGroup>>,

    reconnect: ReconnectScheduler,
    collision_retry: ReconnectScheduler,
}

impl Worker {
    pub(crate) fn new(
        provider: Arc<dyn MdnsProvider>,
        config: RegistrarConfig,
        attempt: RegistrationAttempt,
        shared: Arc<RwLock<SharedState>>,
        events: mpsc::Sender<RegistrarEvent>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            provider,
            config,
            attempt,
            shared,
            events,
            commands,
            generation: 0,
            listener: None,
            client: None,
            group: None,
            reconnect: ReconnectScheduler::new(),
            collision_retry: ReconnectScheduler::new(),
        }
    }

    /// Thread body: build the runtime, connect, then drain the queue
    ///
    /// The result of the initial connection is reported through `ready`
    /// before any queued callback is processed.
    pub(crate) fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        ready: SyncSender<Result<(), ErrorCode>>,
    ) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to create registrar runtime: {}", e);
                let _ = ready.send(Err(ErrorCode::NO_MEMORY));
                return;
            }
        };

        runtime.block_on(async move {
            let started = self.connect();
            let failed = started.is_err();
            let _ = ready.send(started);
            if failed {
                return;
            }

            while let Some(command) = commands.recv().await {
                if !self.handle(command) {
                    break;
                }
            }

            self.release();
        });
    }

    /// Process one command
    ///
    /// # Returns
    ///
    /// `false` when the worker should stop
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::ConnectionState { generation, state } if generation == self.generation => {
                self.on_connection_state(state);
            }
            Command::ConnectionState { state, .. } => {
                debug!("Ignoring connection state {:?} from a closed connection", state);
            }
            Command::GroupState { generation, state } if generation == self.generation => {
                self.on_group_state(state);
            }
            Command::GroupState { state, .. } => {
                debug!("Ignoring group state {:?} from a closed connection", state);
            }
            Command::Reconnect => self.reconnect_to_provider(),
            Command::Repopulate { generation } if generation == self.generation => {
                self.create_services();
            }
            Command::Repopulate { .. } => {}
            Command::Shutdown => return false,
        }

        true
    }

    /// Open a new provider connection under a fresh generation
    fn connect(&mut self) -> Result<(), ErrorCode> {
        self.generation += 1;

        let listener: Arc<dyn RegistrationListener> = Arc::new(CallbackForwarder {
            generation: self.generation,
            commands: self.commands.clone(),
        });

        let client = self.provider.connect(listener.clone())?;
        self.client = Some(client);
        self.listener = Some(listener);
        self.set_connected(true);

        debug!(
            "Connected to {} (generation {})",
            self.provider.provider_name(),
            self.generation
        );
        Ok(())
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Running => {
                debug!("{} daemon running", self.provider.provider_name());
                self.create_services();
            }

            ConnectionState::Failure(code) if code.is_disconnect() => {
                warn!(
                    "Lost connection to {} daemon, reconnecting in {:?}",
                    self.provider.provider_name(),
                    self.config.reconnect_delay()
                );
                self.attempt.needs_reconnect = true;
                if self.reconnect.is_pending() {
                    debug!("Reconnect already pending, restarting its delay");
                }

                let commands = self.commands.clone();
                self.reconnect.schedule(self.config.reconnect_delay(), move || {
                    let _ = commands.send(Command::Reconnect);
                });
            }

            ConnectionState::Failure(code) => {
                // Terminal for the attempt, including a reconnect still waiting to fire
                self.attempt.needs_reconnect = false;
                self.reconnect.cancel();
                error!(
                    "{} client failure: {}",
                    self.provider.provider_name(),
                    self.provider.error_string(code)
                );
                self.emit(RegistrarEvent::Error(code));
            }

            ConnectionState::Collision | ConnectionState::Registering => {
                // Daemon is re-establishing its host records; ours follow on the next Running
                self.collision_retry.cancel();
                if let Some(group) = self.group.as_mut() {
                    debug!("Daemon re-registering, resetting entry group");
                    group.reset();
                }
            }

            ConnectionState::Connecting => {
                debug!("Connecting to {} daemon", self.provider.provider_name());
            }
        }
    }

    fn on_group_state(&mut self, state: GroupState) {
        if self.group.is_none() {
            debug!("Ignoring group state {:?} without an entry group", state);
            return;
        }

        match state {
            GroupState::Established => {
                self.attempt.collision_retries = 0;
                let record = self.attempt.pending_record.clone();

                {
                    let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
                    shared.final_record = Some(record.clone());
                    shared.registered_at = Some(chrono::Utc::now());
                    shared.registrations += 1;
                }

                info!(
                    "Service '{}' registered on port {}",
                    record, self.attempt.service_port
                );
                self.emit(RegistrarEvent::Registered(record));
            }

            GroupState::Collision => {
                if !self.rename_after_collision() {
                    return;
                }

                if let Some(group) = self.group.as_mut() {
                    group.reset();
                }

                let delay = self.config.collision_backoff(self.attempt.collision_retries);
                if delay.is_zero() {
                    self.create_services();
                } else {
                    debug!("Re-committing renamed service in {:?}", delay);
                    let commands = self.commands.clone();
                    let generation = self.generation;
                    self.collision_retry.schedule(delay, move || {
                        let _ = commands.send(Command::Repopulate { generation });
                    });
                }
            }

            GroupState::Failure(code) => {
                error!("Entry group failure: {}", self.provider.error_string(code));
                self.emit(RegistrarEvent::Error(code));
            }

            GroupState::Uncommitted | GroupState::Registering => {
                trace!("Entry group {:?}", state);
            }
        }
    }

    /// Populate the entry group from the pending record and commit it
    ///
    /// Creates the group on first use. Does nothing if the group already has
    /// entries.
    fn create_services(&mut self) {
        if self.group.is_none() {
            let (Some(client), Some(listener)) = (self.client.as_mut(), self.listener.as_ref())
            else {
                debug!("No provider connection, not creating services");
                return;
            };

            match client.create_group(listener.clone()) {
                Ok(group) => self.group = Some(group),
                Err(code) => {
                    error!(
                        "Failed to create entry group: {}",
                        self.provider.error_string(code)
                    );
                    self.emit(RegistrarEvent::Error(code));
                    return;
                }
            }
        }

        loop {
            let entry =
                ServiceEntry::from_record(&self.attempt.pending_record, self.attempt.service_port);
            let added = match self.group.as_mut() {
                Some(group) if group.is_empty() => group.add_service(&entry),
                _ => return,
            };

            match added {
                Ok(()) => break,
                Err(code) if code == ErrorCode::COLLISION => {
                    if !self.rename_after_collision() {
                        return;
                    }
                    if let Some(group) = self.group.as_mut() {
                        group.reset();
                    }
                }
                Err(code) => {
                    error!("Failed to add service: {}", self.provider.error_string(code));
                    self.emit(RegistrarEvent::Error(code));
                    return;
                }
            }
        }

        let committed = match self.group.as_mut() {
            Some(group) => group.commit(),
            None => return,
        };

        if let Err(code) = committed {
            error!(
                "Failed to commit entry group: {}",
                self.provider.error_string(code)
            );
            self.emit(RegistrarEvent::Error(code));
        }
    }

    /// Replace the pending name with the provider's alternative
    ///
    /// # Returns
    ///
    /// `false` if renaming gave up; an error event has been emitted
    fn rename_after_collision(&mut self) -> bool {
        self.attempt.collision_retries += 1;
        if self.attempt.collision_retries > self.config.max_collision_retries {
            error!(
                "Service name still colliding after {} renames, giving up on '{}'",
                self.config.max_collision_retries, self.attempt.pending_record.service_name
            );
            self.emit(RegistrarEvent::Error(ErrorCode::COLLISION));
            return false;
        }

        let previous = &self.attempt.pending_record.service_name;
        let candidate = self.provider.alternative_service_name(previous);
        if candidate.is_empty() || candidate == *previous {
            error!(
                "{} produced no alternative name for '{}'",
                self.provider.provider_name(),
                previous
            );
            self.emit(RegistrarEvent::Error(ErrorCode::COLLISION));
            return false;
        }

        warn!("Service name collision, renaming service to '{}'", candidate);
        self.attempt.pending_record = self.attempt.pending_record.renamed(candidate);
        true
    }

    /// Fired by the reconnect scheduler
    fn reconnect_to_provider(&mut self) {
        if !self.attempt.needs_reconnect {
            debug!("Reconnect no longer needed");
            return;
        }
        self.attempt.needs_reconnect = false;

        self.collision_retry.cancel();
        self.group = None;
        self.client = None;
        self.listener = None;

        {
            let mut shared = self.shared.write().unwrap_or_else(PoisonError::into_inner);
            shared.connected = false;
            shared.reconnects += 1;
        }

        info!("Reconnecting to {} daemon", self.provider.provider_name());
        if let Err(code) = self.connect() {
            error!(
                "Failed to reconnect to {}: {}",
                self.provider.provider_name(),
                self.provider.error_string(code)
            );
            self.emit(RegistrarEvent::Error(code));
        }
    }

    /// Release the group, then the connection
    fn release(&mut self) {
        self.attempt.needs_reconnect = false;
        self.reconnect.cancel();
        self.collision_retry.cancel();
        self.group = None;
        self.client = None;
        self.listener = None;
        self.set_connected(false);
    }

    fn set_connected(&self, connected: bool) {
        self.shared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .connected = connected;
    }

    fn emit(&self, event: RegistrarEvent) {
        if self.events.try_send(event).is_err() {
            warn!("Event channel full or closed, dropping registrar event");
        }
    }
}
