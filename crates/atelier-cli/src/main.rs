use atelier_adapters::AdapterRouter;
use atelier_config::{
    parse_connector_allowlist, parse_connector_policies, parse_connector_profiles,
    parse_connector_secrets,
};
use atelier_gateway::{GatewayServer, IngestPipeline, IngestSettings, MemoryCounterStore};
use atelier_security::{parse_global_secret_list, TelemetryLog};
use atelier_session::{FileStore, SessionStore};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atelier", about = "Atelier — Studio Agent Gateway")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "atelier.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Inspect persisted sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List persisted sessions, newest-updated first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Deserialize)]
struct AtelierConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    ingest: IngestConfig,
    #[serde(default)]
    store: StoreConfig,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Ingest protocol tunables and the operator-supplied connector JSON blobs.
#[derive(Deserialize, Default)]
struct IngestConfig {
    #[serde(default)]
    signing_secret: Option<String>,
    /// CSV of previous secrets kept alive during rotation.
    #[serde(default)]
    previous_signing_secrets: Option<String>,
    #[serde(default)]
    connector_secrets: Option<String>,
    #[serde(default)]
    connector_policies: Option<String>,
    #[serde(default)]
    connector_profiles: Option<String>,
    #[serde(default)]
    connector_allowlist: Option<String>,
    #[serde(default = "default_skew")]
    timestamp_skew_secs: i64,
    #[serde(default = "default_window")]
    rate_limit_window_secs: u64,
    #[serde(default = "default_rate_max")]
    rate_limit_max: u32,
    #[serde(default = "default_idempotency_ttl")]
    idempotency_ttl_secs: u64,
}

#[derive(Deserialize)]
struct StoreConfig {
    #[serde(default = "default_retention")]
    event_retention: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_retention: default_retention(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_skew() -> i64 {
    300
}
fn default_window() -> u64 {
    60
}
fn default_rate_max() -> u32 {
    60
}
fn default_idempotency_ttl() -> u64 {
    3600
}
fn default_retention() -> usize {
    200
}

/// Parse every connector config blob. Any malformed entry aborts startup
/// here, before traffic is accepted.
fn build_ingest_settings(config: &IngestConfig) -> anyhow::Result<IngestSettings> {
    Ok(IngestSettings {
        connector_secrets: parse_connector_secrets(
            config.connector_secrets.as_deref().unwrap_or(""),
        )?,
        connector_policies: parse_connector_policies(
            config.connector_policies.as_deref().unwrap_or(""),
        )?,
        connector_profiles: parse_connector_profiles(
            config.connector_profiles.as_deref().unwrap_or(""),
        )?,
        connector_allowlist: parse_connector_allowlist(config.connector_allowlist.as_deref()),
        global_secrets: parse_global_secret_list(
            config.signing_secret.as_deref(),
            config.previous_signing_secrets.as_deref(),
        ),
        timestamp_skew_secs: config.timestamp_skew_secs,
        rate_limit_window_secs: config.rate_limit_window_secs,
        rate_limit_max: config.rate_limit_max,
        idempotency_ttl_secs: config.idempotency_ttl_secs,
        budgets: Default::default(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config_str = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config file '{}': {}",
            cli.config.display(),
            e
        )
    })?;
    let config: AtelierConfig = toml::from_str(&config_str)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let settings = build_ingest_settings(&config.ingest)?;
            if settings.global_secrets.is_empty() && settings.connector_secrets.is_empty() {
                tracing::warn!(
                    "no signing secrets configured; every ingest request will be rejected"
                );
            }

            let telemetry = Arc::new(TelemetryLog::new(config.data_dir.join("telemetry")));
            let durable = Arc::new(FileStore::new(config.data_dir.join("gateway")).await?);
            let store = Arc::new(SessionStore::with_retention(
                durable,
                config.store.event_retention,
            ));
            let router = Arc::new(AdapterRouter::new(store, telemetry.clone()));
            let counters = Arc::new(MemoryCounterStore::new());
            let pipeline = IngestPipeline::new(settings, router, counters, telemetry);

            let app = GatewayServer::build(pipeline);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Atelier gateway listening on {}", addr);
            axum::serve(listener, app).await?;
        }
        Commands::Sessions {
            action: SessionAction::List { limit },
        } => {
            let durable = Arc::new(FileStore::new(config.data_dir.join("gateway")).await?);
            let store = SessionStore::new(durable);
            let sessions = store.list_persisted_sessions(limit).await?;
            for session in sessions {
                println!(
                    "{}  {}  {}  {}",
                    session.id,
                    session.channel,
                    match session.status {
                        atelier_session::SessionStatus::Active => "active",
                        atelier_session::SessionStatus::Closed => "closed",
                    },
                    session.updated_at.to_rfc3339(),
                );
            }
        }
    }

    Ok(())
}
