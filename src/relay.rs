//! The optional RelaySink offer handler (component C8): a drop-in
//! replacement for the default `Downloader` that never dials the offered
//! host. It parks the offer in a process-visible slot and wakes the HTTP
//! request that is waiting on it, letting an external process drive the
//! actual download.
//!
//! Mirrors `RelayThread`/`relayEvent` from the original `dccapp.py`: the
//! dispatcher's `DCC SEND` path hands the offer to `RelaySink::handle`
//! instead of opening a socket, and the parked HTTP handler serialises it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::dcc::OfferHandler;
use crate::message::DccSendOffer;
use crate::session::Session;

pub struct RelaySink {
    slot: Mutex<Option<DccSendOffer>>,
    notify: Notify,
}

impl RelaySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Park until the next DCC offer arrives, or `timeout` elapses.
    pub async fn wait_for_offer(&self, timeout: Duration) -> Option<DccSendOffer> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(offer) = self.slot.lock().await.take() {
                return Some(offer);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            // notify_one (not notify_waiters), matching Coordinator: a
            // signal delivered just before we call notified() is still
            // observed rather than lost.
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }
}

#[async_trait]
impl OfferHandler for RelaySink {
    async fn handle(&self, offer: DccSendOffer, _session: Arc<Session>) {
        tracing::info!(file = %offer.filename, sender = %offer.sender, "relay intercepted DCC offer");
        *self.slot.lock().await = Some(offer);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn offer() -> DccSendOffer {
        DccSendOffer {
            sender: "Ginpachi-Sensei".to_string(),
            filename: "show.mkv".to_string(),
            ip: Ipv4Addr::new(10, 0, 0, 1),
            port: 5000,
            filesize: 123,
        }
    }

    #[tokio::test]
    async fn wait_returns_once_an_offer_is_handled() {
        let sink = RelaySink::new();
        let session = Session::for_test_arc();
        let handler_sink = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handler_sink.handle(offer(), session).await;
        });

        let received = sink.wait_for_offer(Duration::from_secs(2)).await;
        assert_eq!(received.unwrap().filename, "show.mkv");
    }

    #[tokio::test]
    async fn wait_times_out_with_no_offer() {
        let sink = RelaySink::new();
        let received = sink.wait_for_offer(Duration::from_millis(20)).await;
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn handle_before_wait_is_not_lost() {
        let sink = RelaySink::new();
        let session = Session::for_test_arc();
        sink.handle(offer(), session).await;
        let received = sink.wait_for_offer(Duration::from_secs(1)).await;
        assert!(received.is_some());
    }
}
