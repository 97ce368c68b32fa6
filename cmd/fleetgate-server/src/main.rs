use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::network::DEFAULT_API_PORT;
use pkg_constants::paths::{DEFAULT_SERVER_CONFIG, DEFAULT_SERVER_DATA_DIR};
use pkg_controllers::LifecycleConfig;
use pkg_proxy::GatewayPolicy;
use pkg_types::config::{ServerConfigFile, load_config_file};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "fleetgate-server", about = "fleetgate multi-cluster control plane")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

/// Overlay the config file on the built-in defaults.
fn lifecycle_config(file: &ServerConfigFile) -> LifecycleConfig {
    let mut config = LifecycleConfig::default();
    if let Some(limit) = file.preflight_limit {
        config.preflight_limit = limit.max(1);
    }
    if let Some(secs) = file.downstream_timeout_secs {
        config.downstream_timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(attempts) = file.provisioning.max_attempts {
        config.provisioning.max_attempts = attempts;
    }
    if let Some(ms) = file.provisioning.initial_backoff_ms {
        config.provisioning.initial_backoff = Duration::from_millis(ms);
    }
    config
}

fn gateway_policy(file: &ServerConfigFile) -> GatewayPolicy {
    let mut policy = GatewayPolicy::default();
    let gateway = &file.gateway;
    if let Some(remap) = gateway.remap_forbidden {
        policy.remap_forbidden = remap;
    }
    if let Some(verify) = gateway.verify_upstream_tls {
        policy.verify_upstream_tls = verify;
    }
    if let Some(limit) = gateway.fanout_limit {
        policy.fanout_limit = limit.max(1);
    }
    if let Some(secs) = gateway.connect_timeout_secs {
        policy.connect_timeout = Duration::from_secs(secs);
    }
    policy
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_API_PORT);
    let data_dir = cli
        .data_dir
        .clone()
        .or_else(|| file_cfg.data_dir.clone())
        .unwrap_or_else(|| DEFAULT_SERVER_DATA_DIR.to_string());
    let lifecycle = lifecycle_config(&file_cfg);
    let gateway = gateway_policy(&file_cfg);

    info!("Starting fleetgate-server");
    info!("  Port:       {}", port);
    info!("  Data dir:   {}", data_dir);
    info!("  Users:      {}", file_cfg.users.len());
    info!(
        "  Gateway:    remap-forbidden={} verify-upstream-tls={} fanout-limit={}",
        gateway.remap_forbidden, gateway.verify_upstream_tls, gateway.fanout_limit
    );

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        data_dir,
        users: file_cfg.users,
        lifecycle,
        gateway,
    };

    start_server(config).await?;

    Ok(())
}
