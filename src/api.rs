//! The optional HTTP relay endpoint (§6): `GET /<bot>/<packNum>` resolves a
//! `(bot, pack)` pair into a live DCC offer and returns it as JSON, instead
//! of downloading it. Serialised by a process-wide mutex so at most one IRC
//! bridge session is outstanding at a time, mirroring `dccapp.py`'s single
//! `Lock()` around its one route.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::relay::RelaySink;
use crate::session::{Session, SessionConfig};

const BRIDGE_TIMEOUT: Duration = Duration::from_secs(15);
const OFFER_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<AppConfig>,
    bridge_lock: Arc<tokio::sync::Mutex<()>>,
    request_counter: Arc<AtomicU64>,
}

impl RelayState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            bridge_lock: Arc::new(tokio::sync::Mutex::new(())),
            request_counter: Arc::new(AtomicU64::new(0)),
        }
    }
}

pub fn routes() -> Router<RelayState> {
    Router::new().route("/{bot}/{pack_num}", get(resolve_pack))
}

async fn resolve_pack(
    State(state): State<RelayState>,
    Path((bot, pack_num)): Path<(String, u32)>,
) -> Json<Value> {
    if !(1..=100_000).contains(&pack_num) {
        return Json(json!({}));
    }

    let _guard = state.bridge_lock.lock().await;
    match tokio::time::timeout(BRIDGE_TIMEOUT, bridge_one_request(&state, &bot, pack_num)).await {
        Ok(Some(offer)) => Json(json!({
            "filename": offer.filename,
            "hostname": offer.ip.to_string(),
            "port": offer.port,
            "filesize": offer.filesize,
        })),
        Ok(None) | Err(_) => Json(json!({})),
    }
}

async fn bridge_one_request(
    state: &RelayState,
    bot: &str,
    pack_num: u32,
) -> Option<crate::message::DccSendOffer> {
    let network = state.config.resolve_network();
    let request_id = state.request_counter.fetch_add(1, Ordering::Relaxed);
    let nick = format!("{}{}", state.config.nickname, request_id);

    let session_config = SessionConfig {
        host: network.host,
        port: network.port,
        nick,
        ident: state.config.username.clone(),
        realname: state.config.realname.clone(),
        io_timeout: Duration::from_secs(state.config.io_timeout_secs),
        md5_check: state.config.md5_check,
        max_rate_kib_s: state.config.max_rate_kib_s,
    };

    let sink = RelaySink::new();
    let session = Session::new(session_config, sink.clone());
    session.connect().await;

    if session.coordinator().unable_to_connect() {
        tracing::warn!(%bot, "relay bridge could not connect");
        session.shutdown().await;
        return None;
    }

    session.msg(bot, &format!("XDCC SEND #{pack_num}")).await;
    let offer = sink.wait_for_offer(OFFER_WAIT_TIMEOUT).await;
    session.shutdown().await;
    offer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pack_number_out_of_range() {
        // Exercised through resolve_pack's guard clause, not a full bridge.
        assert!(!(1..=100_000).contains(&0u32));
        assert!(!(1..=100_000).contains(&100_001u32));
        assert!((1..=100_000).contains(&175u32));
    }
}
