//! The IRC session manager (component C6): owns the socket, runs the
//! listener/dispatcher, and exposes the small set of outbound operations
//! (`msg`, `notice`, `join`, `catch_send`) that the rest of the crate issues
//! commands through.
//!
//! Mirrors `IRCConnection`/`ListenerThread`/`IRCParseThread` from the
//! original implementation: `connect()` retries the dial, a nick collision
//! or closing link sets `unable_to_connect` and the handshake is retried; the
//! listener never runs a handler inline — each framed line is dispatched on
//! its own task so a slow DCC transfer can't stall line reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::coordinator::{Coordinator, Namespace};
use crate::dcc::{Downloader, OfferHandler};
use crate::line_framer::LineFramer;
use crate::message::{dcc_offer_from_message, Message};
use crate::token_bucket::TokenBucket;

const DIAL_RETRY_PAUSE: Duration = Duration::from_secs(10);
const RECONNECT_PAUSE: Duration = Duration::from_secs(3);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(300);
const JOIN_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub ident: String,
    pub realname: String,
    pub io_timeout: Duration,
    pub md5_check: bool,
    pub max_rate_kib_s: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6667,
            nick: "xdccbot".to_string(),
            ident: "xdccbot".to_string(),
            realname: "xdcc session".to_string(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            md5_check: false,
            max_rate_kib_s: None,
        }
    }
}

/// Live IRC connection plus the dispatcher that drives it.
pub struct Session {
    config: SessionConfig,
    nick: Mutex<String>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    listener_cancel: Mutex<Option<CancellationToken>>,
    coordinator: Arc<Coordinator>,
    rate_limiter: Option<Arc<TokenBucket>>,
    offer_handler: Arc<dyn OfferHandler>,
    shutting_down: AtomicBool,
}

impl Session {
    pub fn new(config: SessionConfig, offer_handler: Arc<dyn OfferHandler>) -> Arc<Self> {
        let rate_limiter = config
            .max_rate_kib_s
            .and_then(TokenBucket::for_rate_kib_s)
            .map(Arc::new);
        if let Some(bucket) = &rate_limiter {
            bucket.spawn_refill();
        }
        let nick = config.nick.clone();
        Arc::new(Self {
            config,
            nick: Mutex::new(nick),
            writer: Mutex::new(None),
            listener_cancel: Mutex::new(None),
            coordinator: Arc::new(Coordinator::new()),
            rate_limiter,
            offer_handler,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// A minimal, unconnected `Session` for unit tests that only exercise
    /// outbound helpers or the DCC transfer engine (which never touches the
    /// control socket).
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            config: SessionConfig::default(),
            nick: Mutex::new("test".to_string()),
            writer: Mutex::new(None),
            listener_cancel: Mutex::new(None),
            coordinator: Arc::new(Coordinator::new()),
            rate_limiter: None,
            offer_handler: Arc::new(Downloader),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// As `for_test`, but `Arc`-wrapped for callers (e.g. `PacklistPoller`)
    /// that only ever hold a shared `Session`.
    #[cfg(test)]
    pub fn for_test_arc() -> Arc<Self> {
        Arc::new(Self::for_test())
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn md5_check_enabled(&self) -> bool {
        self.config.md5_check
    }

    pub fn rate_limiter(&self) -> Option<&Arc<TokenBucket>> {
        self.rate_limiter.as_ref()
    }

    pub async fn nick(&self) -> String {
        self.nick.lock().await.clone()
    }

    /// Connect (retrying the dial on failure), handshake, and keep
    /// reconnecting on link loss until `shutdown()` is called. Returns once
    /// the first handshake attempt has settled (successfully or not — the
    /// retry loop keeps running in the background after that).
    pub async fn connect(self: &Arc<Self>) {
        self.connect_after(Duration::ZERO).await;
    }

    async fn connect_after(self: &Arc<Self>, initial_delay: Duration) {
        if !initial_delay.is_zero() {
            tokio::time::sleep(initial_delay).await;
        }
        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                return;
            }
            let notify = self.coordinator.new_connected_condition().await;
            match self.dial_and_handshake().await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "connect failed, retrying");
                    tokio::time::sleep(DIAL_RETRY_PAUSE).await;
                    continue;
                }
            }
            notify.notified().await;
            if self.coordinator.unable_to_connect() {
                tracing::info!("handshake rejected, retrying connect");
                continue;
            }
            tracing::info!(nick = %self.nick().await, "connected");
            return;
        }
    }

    async fn dial_and_handshake(self: &Arc<Self>) -> std::io::Result<()> {
        if let Some(token) = self.listener_cancel.lock().await.take() {
            token.cancel();
        }

        let stream = tokio::time::timeout(
            self.config.io_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))??;

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        let nick = self.nick().await;
        self.send_raw(&format!("NICK {nick}")).await?;
        self.send_raw(&format!(
            "USER {} 0 * :{}",
            self.config.ident, self.config.realname
        ))
        .await?;

        let token = CancellationToken::new();
        *self.listener_cancel.lock().await = Some(token.clone());
        let session = self.clone();
        tokio::spawn(async move { session.run_listener(read_half, token).await });

        Ok(())
    }

    async fn run_listener(self: Arc<Self>, mut read_half: OwnedReadHalf, token: CancellationToken) {
        let mut framer = LineFramer::new();
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                result = tokio::time::timeout(self.config.io_timeout, read_half.read(&mut buf)) => {
                    match result {
                        Ok(Ok(0)) => {
                            self.reconnect("connection closed").await;
                            return;
                        }
                        Ok(Ok(n)) => {
                            for line in framer.push(&buf[..n]) {
                                let text = String::from_utf8_lossy(&line).into_owned();
                                let session = self.clone();
                                tokio::spawn(async move { session.dispatch(&text).await });
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "socket read error");
                            self.reconnect("socket error").await;
                            return;
                        }
                        Err(_) => {
                            tracing::warn!("socket read timed out");
                            self.reconnect("socket timeout").await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Replace the connection after link loss. Mirrors `reconnect()`: a 3s
    /// pause before re-entering `connect()`.
    async fn reconnect(self: &Arc<Self>, reason: &str) {
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        tracing::warn!(reason, "reconnecting");
        let session = self.clone();
        tokio::spawn(async move { session.connect_after(RECONNECT_PAUSE).await });
    }

    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        if let Some(token) = self.listener_cancel.lock().await.take() {
            token.cancel();
        }
    }

    async fn dispatch(self: Arc<Self>, line: &str) {
        let Some(msg) = Message::parse(line) else {
            tracing::debug!(%line, "unparseable line, dropped");
            return;
        };

        if msg.command == "ERROR" && msg.trailing.as_deref().is_some_and(|t| t.contains("Closing Link:")) {
            self.coordinator.signal_connected(true).await;
            return;
        }

        if msg.trailing.as_deref() == Some("Nickname is already in use.") {
            let mut nick = self.nick.lock().await;
            nick.push('_');
            drop(nick);
            self.coordinator.signal_connected(true).await;
            return;
        }

        match msg.command.as_str() {
            "PING" => {
                if let Some(server) = &msg.trailing {
                    let _ = self.send_raw(&format!("PONG :{server}")).await;
                }
                // Harmless if nobody is waiting: signal_connected uses a
                // one-shot permit, so a PING outside the handshake window
                // just notifies a condition nobody will ever observe.
                self.coordinator.signal_connected(false).await;
            }
            "JOIN" => {
                let our_nick = self.nick().await;
                if msg.nick.as_deref() == Some(our_nick.as_str()) {
                    let channel = msg
                        .params
                        .first()
                        .cloned()
                        .or_else(|| msg.trailing.clone());
                    if let Some(channel) = channel {
                        self.coordinator.notify(Namespace::Join, &channel).await;
                    }
                }
            }
            "PRIVMSG" | "NOTICE" => self.dispatch_privmsg_or_notice(&msg).await,
            _ => {
                if let Some(target) = msg.params.first() {
                    let our_nick = self.nick().await;
                    if target == &our_nick {
                        if let Some(trailing) = &msg.trailing {
                            if trailing.contains("Welcome to the") {
                                self.coordinator.signal_connected(false).await;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_privmsg_or_notice(self: Arc<Self>, msg: &Message) {
        if msg.is_ctcp_version() {
            if let Some(sender) = &msg.nick {
                self.notice(sender, "VERSION xdcc-session").await;
            }
            return;
        }

        let nick = self.nick().await;
        if let Some(offer) = dcc_offer_from_message(msg, &nick) {
            let sender = offer.sender.clone();
            let filename = offer.filename.clone();
            let handler = self.offer_handler.clone();
            handler.handle(offer, self.clone()).await;

            // Unconditional regardless of transfer outcome: the original
            // dispatcher records the offered filename even when the
            // download itself failed or was skipped.
            self.coordinator.set_packlist(&sender, filename).await;
            self.coordinator.notify(Namespace::Packlist, &sender).await;
            self.coordinator.notify(Namespace::Response, &sender).await;
            return;
        }

        let Some(trailing) = msg.trailing.clone() else {
            return;
        };
        let Some(sender) = msg.nick.clone() else {
            return;
        };

        if let Some(md5) = parse_md5sum_notice(&trailing) {
            self.coordinator.set_md5(&sender, md5).await;
            self.coordinator.notify(Namespace::Md5, &sender).await;
        } else if trailing.contains("don't have a transfer") || trailing.contains("Transfer canceled by user") {
            self.coordinator.set_last_requested_pack(&sender, None).await;
            self.coordinator.notify(Namespace::Cancel, &sender).await;
            self.coordinator.notify(Namespace::Response, &sender).await;
            self.coordinator.notify(Namespace::Packlist, &sender).await;
        } else if trailing.contains("You can only have") && trailing.contains("queue for") {
            tracing::info!(%sender, "queued, waiting");
        }
    }

    async fn send_raw(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no active connection",
            ));
        };
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await
    }

    /// Attempt to send; on socket failure, trigger reconnect instead of
    /// propagating the error to the caller.
    async fn catch_send(self: &Arc<Self>, line: &str) {
        if let Err(e) = self.send_raw(line).await {
            tracing::debug!(error = %e, "send failed");
            self.reconnect("send failure").await;
        }
    }

    pub async fn msg(self: &Arc<Self>, who: &str, text: &str) {
        self.catch_send(&format!("PRIVMSG {who} :{text}")).await;
    }

    pub async fn notice(self: &Arc<Self>, who: &str, text: &str) {
        self.catch_send(&format!("NOTICE {who} :\x01{text}\x01")).await;
    }

    /// Send `JOIN #channel` and wait (bounded) on the channel's join echo.
    pub async fn join(self: &Arc<Self>, channel: &str) {
        let notify = self.coordinator.condition(Namespace::Join, channel).await;
        self.catch_send(&format!("JOIN {channel}")).await;
        let _ = tokio::time::timeout(JOIN_WAIT_TIMEOUT, notify.notified()).await;
        self.coordinator.take(Namespace::Join, channel).await;
    }

    /// Best-effort outbound helpers used by the DCC transfer engine, which
    /// only ever holds `&Session` (never the owning `Arc`). Failures are
    /// logged, never propagated or reconnect-triggering — a request that
    /// can't be sent because the link just dropped is no different from one
    /// the bot silently ignores.
    pub async fn send_msg(&self, target: &str, text: &str) {
        let _ = self.send_raw(&format!("PRIVMSG {target} :{text}")).await;
    }

    pub async fn send_cancel(&self, bot: &str) {
        let _ = self.send_raw(&format!("PRIVMSG {bot} :XDCC CANCEL")).await;
    }
}

/// `md5sum <hex>` NOTICE reply to `XDCC INFO #n`.
fn parse_md5sum_notice(trailing: &str) -> Option<String> {
    let rest = trailing.trim().strip_prefix("md5sum")?.trim();
    if rest.len() >= 32 && rest.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(rest.to_lowercase())
    } else {
        None
    }
}
