//! Test doubles and common utilities for registrar contract tests
//!
//! [`MockProvider`] stands in for the mDNS daemon. It can run scripted (reply
//! `Running` on connect and `Established`/`Collision` on commit) or manual,
//! where the test drives every callback itself.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use svcreg_core::{
    ConnectionState, EntryGroup, ErrorCode, GroupState, MdnsProvider, ProviderClient,
    RegistrarConfig, RegistrarEvent, RegistrationListener, ServiceEntry, ServiceRecord,
};
use tokio::sync::mpsc;

/// How long tests wait for something that should happen
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Behavior of the mock daemon
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Report `Running` from inside `connect`
    pub auto_running: bool,
    /// Report `Established` (or `Collision`) from inside `commit`
    pub auto_establish: bool,
    /// Errors returned by `connect`, keyed by attempt (0-based)
    pub connect_errors: HashMap<usize, ErrorCode>,
    /// Error returned by `create_group`
    pub group_error: Option<ErrorCode>,
    /// Error returned by `commit`
    pub commit_error: Option<ErrorCode>,
    /// Names rejected by `add_service` as locally in use
    pub local_taken: HashSet<String>,
    /// Names that collide with a remote service after commit
    pub remote_taken: HashSet<String>,
    /// Make `alternative_service_name` return its input unchanged
    pub stuck_alternative: bool,
}

#[derive(Default)]
struct MockInner {
    script: Mutex<Script>,
    listeners: Mutex<Vec<Arc<dyn RegistrationListener>>>,
    commits: Mutex<Vec<ServiceEntry>>,
    drops: Mutex<Vec<&'static str>>,
    connect_count: AtomicUsize,
    group_count: AtomicUsize,
    reset_count: AtomicUsize,
    live_clients: AtomicUsize,
    live_groups: AtomicUsize,
}

/// A scripted MdnsProvider that tracks calls
#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<MockInner>,
}

impl MockProvider {
    /// Manual provider: the test drives every callback
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripted provider: connects, runs and establishes on its own
    pub fn auto() -> Self {
        let provider = Self::new();
        provider.update_script(|s| {
            s.auto_running = true;
            s.auto_establish = true;
        });
        provider
    }

    /// Modify the script
    pub fn update_script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.inner.script.lock().unwrap());
    }

    /// Mark a name as taken by a remote service
    pub fn with_remote_taken(self, name: &str) -> Self {
        self.update_script(|s| {
            s.remote_taken.insert(name.to_string());
        });
        self
    }

    /// Mark a name as taken by a local service
    pub fn with_local_taken(self, name: &str) -> Self {
        self.update_script(|s| {
            s.local_taken.insert(name.to_string());
        });
        self
    }

    /// Fail the `attempt`-th (0-based) `connect` call with `code`
    pub fn fail_connect(self, attempt: usize, code: ErrorCode) -> Self {
        self.update_script(|s| {
            s.connect_errors.insert(attempt, code);
        });
        self
    }

    /// Listener registered by the most recent `connect`
    pub fn listener(&self) -> Arc<dyn RegistrationListener> {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("connect() has not been called")
    }

    /// Listener registered by the `index`-th `connect`
    pub fn listener_at(&self, index: usize) -> Arc<dyn RegistrationListener> {
        self.inner.listeners.lock().unwrap()[index].clone()
    }

    /// Deliver a connection state to the current listener
    pub fn emit_connection_state(&self, state: ConnectionState) {
        self.listener().on_connection_state_changed(state);
    }

    /// Deliver a group state to the current listener
    pub fn emit_group_state(&self, state: GroupState) {
        self.listener().on_group_state_changed(state);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connect_count.load(Ordering::SeqCst)
    }

    pub fn group_count(&self) -> usize {
        self.inner.group_count.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.inner.reset_count.load(Ordering::SeqCst)
    }

    pub fn live_clients(&self) -> usize {
        self.inner.live_clients.load(Ordering::SeqCst)
    }

    pub fn live_groups(&self) -> usize {
        self.inner.live_groups.load(Ordering::SeqCst)
    }

    /// Entries passed to `commit`, in order
    pub fn commits(&self) -> Vec<ServiceEntry> {
        self.inner.commits.lock().unwrap().clone()
    }

    pub fn commit_count(&self) -> usize {
        self.inner.commits.lock().unwrap().len()
    }

    /// Order in which groups and clients were freed
    pub fn drops(&self) -> Vec<&'static str> {
        self.inner.drops.lock().unwrap().clone()
    }

    fn script(&self) -> Script {
        self.inner.script.lock().unwrap().clone()
    }
}

impl MdnsProvider for MockProvider {
    fn connect(
        &self,
        listener: Arc<dyn RegistrationListener>,
    ) -> Result<Box<dyn ProviderClient>, ErrorCode> {
        let attempt = self.inner.connect_count.fetch_add(1, Ordering::SeqCst);
        let script = self.script();

        if let Some(code) = script.connect_errors.get(&attempt) {
            return Err(*code);
        }

        self.inner.listeners.lock().unwrap().push(listener.clone());
        self.inner.live_clients.fetch_add(1, Ordering::SeqCst);

        listener.on_connection_state_changed(ConnectionState::Connecting);
        if script.auto_running {
            listener.on_connection_state_changed(ConnectionState::Running);
        }

        Ok(Box::new(MockClient {
            provider: self.clone(),
        }))
    }

    fn alternative_service_name(&self, name: &str) -> String {
        if self.script().stuck_alternative {
            return name.to_string();
        }

        if let Some((base, suffix)) = name.rsplit_once(" #")
            && let Ok(n) = suffix.parse::<u32>()
        {
            return format!("{} #{}", base, n + 1);
        }
        format!("{} #2", name)
    }

    fn error_string(&self, code: ErrorCode) -> String {
        format!("mock error {}", code)
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

struct MockClient {
    provider: MockProvider,
}

impl ProviderClient for MockClient {
    fn create_group(
        &mut self,
        listener: Arc<dyn RegistrationListener>,
    ) -> Result<Box<dyn EntryGroup>, ErrorCode> {
        if let Some(code) = self.provider.script().group_error {
            return Err(code);
        }

        self.provider.inner.group_count.fetch_add(1, Ordering::SeqCst);
        self.provider.inner.live_groups.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockGroup {
            provider: self.provider.clone(),
            listener,
            entries: Vec::new(),
        }))
    }
}

impl Drop for MockClient {
    fn drop(&mut self) {
        self.provider.inner.live_clients.fetch_sub(1, Ordering::SeqCst);
        self.provider.inner.drops.lock().unwrap().push("client");
    }
}

struct MockGroup {
    provider: MockProvider,
    listener: Arc<dyn RegistrationListener>,
    entries: Vec<ServiceEntry>,
}

impl EntryGroup for MockGroup {
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add_service(&mut self, entry: &ServiceEntry) -> Result<(), ErrorCode> {
        if self.provider.script().local_taken.contains(&entry.name) {
            return Err(ErrorCode::COLLISION);
        }
        self.entries.push(entry.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ErrorCode> {
        let script = self.provider.script();
        if let Some(code) = script.commit_error {
            return Err(code);
        }

        self.provider
            .inner
            .commits
            .lock()
            .unwrap()
            .extend(self.entries.iter().cloned());

        if script.auto_establish {
            self.listener.on_group_state_changed(GroupState::Registering);
            let collided = self
                .entries
                .iter()
                .any(|e| script.remote_taken.contains(&e.name));
            if collided {
                self.listener.on_group_state_changed(GroupState::Collision);
            } else {
                self.listener.on_group_state_changed(GroupState::Established);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.provider.inner.reset_count.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }
}

impl Drop for MockGroup {
    fn drop(&mut self) {
        self.provider.inner.live_groups.fetch_sub(1, Ordering::SeqCst);
        self.provider.inner.drops.lock().unwrap().push("group");
    }
}

/// Registrar configuration with short delays for tests
pub fn fast_config() -> RegistrarConfig {
    RegistrarConfig {
        reconnect_delay_ms: 50,
        max_collision_retries: 10,
        collision_backoff_ms: 0,
        max_collision_backoff_ms: 0,
        event_channel_capacity: 100,
    }
}

/// The record used throughout the scenarios
pub fn workstation() -> ServiceRecord {
    ServiceRecord::new("Workstation", "_input._tcp").with_domain("")
}

/// Wait for the next event, failing the test on timeout
pub async fn next_event(rx: &mut mpsc::Receiver<RegistrarEvent>) -> RegistrarEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a registrar event")
        .expect("event channel closed")
}

/// Assert that no event arrives within `window`
pub async fn assert_no_event(rx: &mut mpsc::Receiver<RegistrarEvent>, window: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected registrar event: {:?}", event);
    }
}

/// Poll `condition` until it holds, failing the test on timeout
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for condition"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
