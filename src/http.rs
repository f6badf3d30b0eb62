//! Read-only status server over the plugin registry, plus one endpoint to
//! push a message into a channel.

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::HttpConfig;
use crate::registry::Registry;
use crate::wire;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub irc_tx: mpsc::Sender<String>,
}

#[derive(Debug, Serialize)]
struct PluginView {
    command: String,
    description: String,
    group: Option<String>,
    registered_at: DateTime<Utc>,
    author: String,
    location: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/plugins-loaded.cgi", get(plugins_loaded))
        .route("/plugins-unresponsive.cgi", get(plugins_unresponsive))
        .route("/post-message.cgi", post(post_message))
        .with_state(state)
}

pub async fn run(state: AppState, cfg: HttpConfig) -> Result<()> {
    let addr = format!("{}:{}", cfg.bind, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("status server listening on http://{}", addr);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let mut page = String::from(
        "<html><head><title>busbot</title></head><body><h1>busbot</h1>\
         <h2>loaded plugins</h2><table>\
         <tr><th>command</th><th>group</th><th>author</th><th>location</th></tr>\
         <tr><th colspan=4>description</th></tr>",
    );

    for (name, entry) in state.registry.snapshot() {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            name,
            entry.acl_group.as_deref().unwrap_or("-"),
            entry.author,
            entry.location
        ));
        page.push_str(&format!(
            "<tr><td colspan=4>{}</td></tr>",
            entry.description
        ));
    }

    page.push_str("</table></body></html>");
    Html(page)
}

async fn plugins_loaded(State(state): State<AppState>) -> Json<Vec<PluginView>> {
    let views = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(command, entry)| PluginView {
            command,
            description: entry.description,
            group: entry.acl_group,
            registered_at: entry.registered_at,
            author: entry.author,
            location: entry.location,
        })
        .collect();
    Json(views)
}

/// Eviction timestamps (unix seconds) of commands that stopped responding.
async fn plugins_unresponsive(State(state): State<AppState>) -> Json<HashMap<String, i64>> {
    let gone = state
        .registry
        .gone_snapshot()
        .into_iter()
        .map(|(name, when)| (name, when.timestamp()))
        .collect();
    Json(gone)
}

async fn post_message(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let channel = body.get("channel").and_then(|v| v.as_str());
    let text = body.get("text").and_then(|v| v.as_str());

    let (Some(channel), Some(text)) = (channel, text) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };

    if [channel, text]
        .iter()
        .any(|s| s.contains('\r') || s.contains('\n'))
    {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    match state.irc_tx.send(wire::privmsg(channel, text)).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("cannot queue message for {}: {}", channel, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
