//! busbot: a bridge between an IRC channel population and an MQTT plugin
//! ecosystem. Users invoke `~command` lines; the bot checks them against a
//! SQL ACL store, expands aliases, runs built-ins itself and republishes
//! everything else onto the bus.

mod acl;
mod alias;
mod bot;
mod bus;
mod config;
mod database;
mod dispatch;
mod http;
mod pager;
mod ratelimit;
mod registry;
mod roster;
mod session;
mod wire;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use bot::Bot;
use bus::Bus;
use config::Config;
use database::Db;
use registry::Registry;
use roster::Roster;
use session::{Session, Shared};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "busbot.toml".to_string());

    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config from {}: {}", config_path, e);
            return Err(e);
        }
    };
    info!("configuration loaded from {}", config_path);

    let db = Db::connect(&config.db).await?;
    let (bus, event_loop) = Bus::new(&config.mqtt);

    let (irc_tx, irc_rx) = mpsc::channel(64);
    let shared = Arc::new(Shared::new(&config.irc.channels));
    let roster = Arc::new(Roster::new());
    let registry = Arc::new(Registry::new());

    let bot = Arc::new(Bot::new(
        config.irc.clone(),
        irc_tx.clone(),
        shared.clone(),
        roster,
        registry.clone(),
        db.clone(),
        bus,
    ));

    tokio::spawn(bus::run(event_loop, bot.clone()));
    bot.subscribe_topics().await?;
    bot.announce().await?;

    registry::spawn_janitor(registry.clone());
    database::spawn_probe(db);
    session::spawn_keepalive(shared.clone());

    let http_state = http::AppState {
        registry,
        irc_tx,
    };
    let http_cfg = config.http.clone();
    tokio::spawn(async move {
        if let Err(e) = http::run(http_state, http_cfg).await {
            error!("status server failed: {:#}", e);
        }
    });

    info!("busbot starting");
    Session::new(config.irc, shared, bot, irc_rx).run().await
}
