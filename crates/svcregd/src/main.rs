// # svcregd - Service Registration Daemon
//
// Thin integration layer around `svcreg-core`:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering one service through the mdns-sd provider
// 4. Logging registration events until SIGTERM/SIGINT
//
// Registration, renaming and reconnect logic all live in `svcreg-core`.
//
// ## Configuration
//
// - `SVCREG_CONFIG_FILE`: JSON service description (`name`, `service_type`,
//   `domain`, `port`); replaces the `SVCREG_SERVICE_*`, `SVCREG_DOMAIN` and
//   `SVCREG_PORT` variables when set
// - `SVCREG_SERVICE_NAME`: Instance name (default: host name)
// - `SVCREG_SERVICE_TYPE`: DNS-SD type (default: `_svcreg._tcp`)
// - `SVCREG_DOMAIN`: Domain to register in (default: provider default)
// - `SVCREG_PORT`: Advertised port (default: 24800)
// - `SVCREG_RECONNECT_DELAY_MS`: Delay before reconnecting to the daemon
// - `SVCREG_MAX_COLLISION_RETRIES`: Renames attempted before giving up
// - `SVCREG_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export SVCREG_SERVICE_NAME=Workstation
// export SVCREG_SERVICE_TYPE=_input._tcp
// export SVCREG_PORT=24800
//
// svcregd
// ```

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use svcreg_core::{
    MdnsProvider, RegistrarConfig, RegistrarEvent, ServiceConfig, ServiceRegistrar,
};
use svcreg_provider_mdns_sd::MdnsSdProvider;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_SERVICE_TYPE: &str = "_svcreg._tcp";
const DEFAULT_PORT: u16 = 24800;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum SvcregExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error, including a registration that failed for good
    RuntimeError = 2,
}

impl From<SvcregExitCode> for ExitCode {
    fn from(code: SvcregExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    service: ServiceConfig,
    registrar: RegistrarConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup` (variable name to value)
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let service = match lookup("SVCREG_CONFIG_FILE") {
            Some(path) => service_from_file(&path)?,
            None => service_from_vars(&lookup)?,
        };

        let mut registrar = RegistrarConfig::default();
        if let Some(delay) = parse_var(&lookup, "SVCREG_RECONNECT_DELAY_MS")? {
            registrar.reconnect_delay_ms = delay;
        }
        if let Some(retries) = parse_var(&lookup, "SVCREG_MAX_COLLISION_RETRIES")? {
            registrar.max_collision_retries = retries;
        }

        Ok(Self {
            service,
            registrar,
            log_level: lookup("SVCREG_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.service
            .validate()
            .context("Invalid service configuration")?;
        self.registrar
            .validate()
            .context("Invalid registrar configuration")?;

        if self.registrar.reconnect_delay_ms == 0 {
            anyhow::bail!("SVCREG_RECONNECT_DELAY_MS must be greater than 0");
        }

        if log_level(&self.log_level).is_none() {
            anyhow::bail!(
                "SVCREG_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            );
        }

        Ok(())
    }
}

/// Read the service description from a JSON file
fn service_from_file(path: &str) -> Result<ServiceConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read SVCREG_CONFIG_FILE {}", path))?;
    ServiceConfig::from_json(&json)
        .with_context(|| format!("Invalid service description in {}", path))
}

fn service_from_vars(lookup: &impl Fn(&str) -> Option<String>) -> Result<ServiceConfig> {
    let name = match lookup("SVCREG_SERVICE_NAME") {
        Some(name) => name,
        None => default_service_name()?,
    };

    let mut service = ServiceConfig::new(
        name,
        lookup("SVCREG_SERVICE_TYPE").unwrap_or_else(|| DEFAULT_SERVICE_TYPE.to_string()),
        parse_var(lookup, "SVCREG_PORT")?.unwrap_or(DEFAULT_PORT),
    );
    service.domain = lookup("SVCREG_DOMAIN").filter(|d| !d.is_empty());
    Ok(service)
}

/// Parse an optional numeric variable, rejecting malformed values
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("{} has an invalid value: '{}'", key, value))
        })
        .transpose()
}

/// First label of the machine's host name
fn default_service_name() -> Result<String> {
    let host = hostname::get().context("Failed to get system hostname")?;
    let host = host.to_string_lossy();
    Ok(host.split('.').next().unwrap_or_default().to_string())
}

fn log_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return SvcregExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return SvcregExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&config.log_level).unwrap_or(Level::INFO))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SvcregExitCode::ConfigError.into();
    }

    info!("Starting svcregd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SvcregExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            SvcregExitCode::RuntimeError
        } else {
            SvcregExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let provider = Arc::new(MdnsSdProvider::new().context("Failed to create mDNS provider")?);
    info!(
        provider = provider.provider_name(),
        host = provider.host_name(),
        "Provider ready"
    );

    let (mut registrar, events) = ServiceRegistrar::new(provider.clone(), config.registrar)?;
    let record = config.service.record();
    let port = config.service.port;

    info!(service = %record, port, "Registering service");
    tokio::task::block_in_place(|| registrar.register_service(record, port));

    let mut events = ReceiverStream::new(events);
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            signal = &mut shutdown => match signal {
                Ok(name) => {
                    info!("Received shutdown signal: {}", name);
                    break Ok(());
                }
                Err(e) => break Err(e),
            },
            event = events.next() => match event {
                Some(RegistrarEvent::Registered(record)) => {
                    info!(service = %record, "Service registered");
                }
                Some(RegistrarEvent::Error(code)) => {
                    let reason = provider.error_string(code);
                    error!(code = code.code(), reason = %reason, "Service registration failed");
                    break Err(anyhow::anyhow!("registration failed: {}", reason));
                }
                None => {
                    warn!("Registrar event channel closed");
                    break Ok(());
                }
            },
        }
    };

    let status = registrar.status();
    info!("Shutting down daemon");
    tokio::task::block_in_place(|| registrar.reset());
    info!(
        registrations = status.registrations,
        reconnects = status.reconnects,
        "Service withdrawn"
    );

    outcome
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
