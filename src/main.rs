mod api;
mod config;
mod coordinator;
mod dcc;
mod error;
mod filters;
mod line_framer;
mod message;
mod packlist;
mod relay;
mod session;
mod token_bucket;
mod util;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::RelayState;
use crate::config::AppConfig;
use crate::dcc::Downloader;
use crate::packlist::PacklistPoller;
use crate::session::{Session, SessionConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "xdcc_session=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting xdcc-session");

    let config_path =
        std::env::var("XDCC_CONFIG_FILE").unwrap_or_else(|_| "config.json".to_string());
    let config = Arc::new(AppConfig::load(&config_path));

    tokio::fs::create_dir_all(&config.download_dir).await?;
    std::env::set_current_dir(&config.download_dir)?;
    tracing::info!(dir = %config.download_dir, "downloads land in this directory");

    if config.relay.enabled {
        run_relay(config).await
    } else {
        run_poller(config).await
    }
}

/// Default mode: connect once, join any configured channels, and run one
/// `PacklistPoller` per configured bot against the shared session.
async fn run_poller(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let network = config.resolve_network();
    let session_config = SessionConfig {
        host: network.host.clone(),
        port: network.port,
        nick: config.nickname.clone(),
        ident: config.username.clone(),
        realname: config.realname.clone(),
        io_timeout: Duration::from_secs(config.io_timeout_secs),
        md5_check: config.md5_check,
        max_rate_kib_s: config.max_rate_kib_s,
    };

    let session = Session::new(session_config, Arc::new(Downloader));
    session.connect().await;

    if session.coordinator().unable_to_connect() {
        anyhow::bail!("unable to connect to {}:{}", network.host, network.port);
    }
    tracing::info!(host = %network.host, port = network.port, "connected");

    for channel in &network.autojoin_channels {
        session.join(channel).await;
        tokio::time::sleep(Duration::from_secs(network.join_delay_secs)).await;
    }

    if config.bots.is_empty() {
        tracing::warn!("no bots configured; idling until shutdown");
    }

    let mut handles = Vec::new();
    for target in &config.bots {
        let text = tokio::fs::read_to_string(&target.filters_file)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(file = %target.filters_file, error = %e, "failed to read filter file, using no filters");
                String::new()
            });
        let filters = filters::load_filters(&text).unwrap_or_else(|e| {
            tracing::warn!(bot = %target.bot, error = %e, "invalid filter file, using no filters");
            Vec::new()
        });

        let session = session.clone();
        let bot = target.bot.clone();
        let sleep = Duration::from_secs(target.sleep_secs);
        let repeat = target.repeat;
        handles.push(tokio::spawn(async move {
            let mut poller = PacklistPoller::new(bot, filters, sleep, repeat);
            poller.run(&session).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    session.shutdown().await;
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

/// Relay mode (§4.8/§6): no pollers run, just the HTTP bridge endpoint.
async fn run_relay(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = config.relay.bind_addr.parse()?;
    let state = RelayState::new(config);

    let app = api::routes().with_state(state);
    tracing::info!(%addr, "relay endpoint listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
