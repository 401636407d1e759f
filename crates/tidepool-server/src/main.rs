//! tidepool-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) merged with
//! `TIDEPOOL_*` environment variables, opens the SQLite store, compiles
//! the access rules, connects to the broker when one is configured, and
//! serves the document API.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use tidepool_rules::RuleSet;
use tidepool_server::{
  AppState, ServerConfig, bus::EventBus, token::TokenIssuer,
};
use tidepool_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "tidepool document database server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("TIDEPOOL"))
    .build()
    .context("failed to read config file")?;
  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store = SqliteStore::open(&server_cfg.store_path)
    .await
    .with_context(|| {
      format!("failed to open store at {:?}", server_cfg.store_path)
    })?;

  let rules = RuleSet::compile(&server_cfg.rules)
    .context("failed to compile access rules")?;
  if server_cfg.rules.is_empty() {
    tracing::warn!("no access rules configured; every request will be denied");
  }

  let tokens = TokenIssuer::load_or_generate(&server_cfg.signing_key_path)
    .with_context(|| {
      format!("failed to load signing key {:?}", server_cfg.signing_key_path)
    })?;

  let bus = match &server_cfg.broker_url {
    Some(url) => EventBus::connect(url)
      .await
      .with_context(|| format!("failed to connect to broker at {url}"))?,
    None => {
      tracing::warn!("no broker configured; live change propagation disabled");
      EventBus::disabled()
    }
  };

  let state = AppState {
    store:  Arc::new(store),
    rules:  Arc::new(rules),
    bus:    Arc::new(bus),
    tokens: Arc::new(tokens),
  };

  let app = tidepool_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;
  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
