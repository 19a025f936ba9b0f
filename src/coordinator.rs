//! Process-wide (well, Session-wide — see §9 of the spec) synchronization
//! registry: the filesystem lock plus the per-bot/per-channel condition and
//! one-shot event maps that the dispatcher, Session, PacklistPoller and
//! DccTransfer rendezvous through.
//!
//! Entries are created lazily on first reference (`condition`/`event`) and
//! removed by the waiter after it wakes (`take`). Producers (the dispatcher)
//! tolerate an absent key as "nobody is waiting" and simply skip the notify.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Packlist,
    Response,
    Cancel,
    Join,
    Md5,
}

#[derive(Default)]
struct Registry {
    conditions: HashMap<(Namespace, String), Arc<Notify>>,
}

pub struct Coordinator {
    /// Serialises the "check existence -> open for write" critical section.
    pub fs_lock: Mutex<()>,

    registry: Mutex<Registry>,

    last_requested_pack: Mutex<HashMap<String, Option<String>>>,
    packlists: Mutex<HashMap<String, String>>,
    md5_data: Mutex<HashMap<String, String>>,

    connected_condition: Mutex<Option<Arc<Notify>>>,
    unable_to_connect: AtomicBool,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            fs_lock: Mutex::new(()),
            registry: Mutex::new(Registry::default()),
            last_requested_pack: Mutex::new(HashMap::new()),
            packlists: Mutex::new(HashMap::new()),
            md5_data: Mutex::new(HashMap::new()),
            connected_condition: Mutex::new(None),
            unable_to_connect: AtomicBool::new(false),
        }
    }

    /// Consumer-side: fetch (creating if absent) the condition for
    /// `(namespace, key)`. The caller is expected to `take` it once woken.
    pub async fn condition(&self, namespace: Namespace, key: &str) -> Arc<Notify> {
        let mut registry = self.registry.lock().await;
        registry
            .conditions
            .entry((namespace, key.to_string()))
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Producer-side: signal `(namespace, key)` if anybody is waiting;
    /// tolerates an absent key. Uses `notify_one` (not `notify_waiters`) so a
    /// signal that arrives just before the consumer calls `notified()` is
    /// still delivered instead of lost.
    pub async fn notify(&self, namespace: Namespace, key: &str) {
        let registry = self.registry.lock().await;
        if let Some(notify) = registry.conditions.get(&(namespace, key.to_string())) {
            notify.notify_one();
        }
    }

    /// Remove the condition for `(namespace, key)` after the waiter has
    /// consumed its signal.
    pub async fn take(&self, namespace: Namespace, key: &str) {
        let mut registry = self.registry.lock().await;
        registry.conditions.remove(&(namespace, key.to_string()));
    }

    pub async fn last_requested_pack(&self, bot: &str) -> Option<String> {
        self.last_requested_pack
            .lock()
            .await
            .get(bot)
            .cloned()
            .flatten()
    }

    pub async fn set_last_requested_pack(&self, bot: &str, pack: Option<String>) {
        self.last_requested_pack
            .lock()
            .await
            .insert(bot.to_string(), pack);
    }

    pub async fn packlist(&self, bot: &str) -> Option<String> {
        self.packlists.lock().await.get(bot).cloned()
    }

    pub async fn set_packlist(&self, bot: &str, filename: String) {
        self.packlists.lock().await.insert(bot.to_string(), filename);
    }

    pub async fn md5(&self, bot: &str) -> Option<String> {
        self.md5_data.lock().await.get(bot).cloned()
    }

    pub async fn set_md5(&self, bot: &str, md5: String) {
        self.md5_data.lock().await.insert(bot.to_string(), md5);
    }

    /// Replace the connect-handshake condition with a fresh one, clearing
    /// `unable_to_connect`. Returns the new condition for the caller to wait on.
    pub async fn new_connected_condition(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.connected_condition.lock().await = Some(notify.clone());
        self.unable_to_connect.store(false, Ordering::Release);
        notify
    }

    pub async fn signal_connected(&self, unable_to_connect: bool) {
        if unable_to_connect {
            self.unable_to_connect.store(true, Ordering::Release);
        }
        if let Some(notify) = self.connected_condition.lock().await.as_ref() {
            notify.notify_one();
        }
    }

    pub fn unable_to_connect(&self) -> bool {
        self.unable_to_connect.load(Ordering::Acquire)
    }
}
