//! The packlist poller (component C5): periodically requests pack `#1`
//! from a bot, parses the returned listing against a set of filter
//! predicates, and requests each matching pack serially.
//!
//! Mirrors `PacklistParsingThread`/`waitOnPacklist`/`parseFile` from the
//! original implementation. One poller instance is intended per bot;
//! uniqueness is not enforced here (callers are responsible for not
//! spawning two for the same bot).

use std::path::Path;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::coordinator::Namespace;
use crate::filters::Filter;
use crate::session::Session;

const CANCEL_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_SLEEP: Duration = Duration::from_secs(3 * 60 * 60);

/// `"<pack> <dls>x [<size>] <name>"`, e.g. `#12  34x [700M] Some.Show.S01E01.mkv`.
/// The size bracket is mandatory, matching the original's line shape
/// (`irc.py:342`) — otherwise a bracket-prefixed name with no size column
/// (e.g. a release-group tag) would be swallowed as the size field and the
/// captured name would drop that tag.
fn packlist_line() -> Regex {
    Regex::new(r"^\s*(#\d+)\s+\d+x\s+\[[^\]]*\]\s+(\S.*\S|\S)\s*$").unwrap()
}

pub struct PacklistPoller {
    bot: String,
    filters: Vec<Filter>,
    sleep: Duration,
    repeat: bool,
    current_packlist: Option<String>,
}

impl PacklistPoller {
    pub fn new(bot: impl Into<String>, filters: Vec<Filter>, sleep: Duration, repeat: bool) -> Self {
        Self {
            bot: bot.into(),
            filters,
            sleep,
            repeat,
            current_packlist: None,
        }
    }

    pub fn with_default_sleep(bot: impl Into<String>, filters: Vec<Filter>, repeat: bool) -> Self {
        Self::new(bot, filters, DEFAULT_SLEEP, repeat)
    }

    /// Drive the poll loop. Runs until `repeat` is false (single pass) or
    /// the packlist never arrives.
    pub async fn run(&mut self, session: &std::sync::Arc<Session>) {
        loop {
            let iter_start = Instant::now();

            self.cancel_outstanding(session).await;

            let arrived = self.wait_on_packlist(session).await;
            if arrived {
                if let Err(e) = self.parse_and_request(session).await {
                    tracing::warn!(bot = %self.bot, error = %e, "failed to read packlist");
                }
            } else {
                tracing::warn!(bot = %self.bot, "packlist never arrived");
            }

            if !self.repeat {
                return;
            }

            if arrived {
                let elapsed = iter_start.elapsed();
                if let Some(remainder) = self.sleep.checked_sub(elapsed) {
                    if !remainder.is_zero() {
                        tokio::time::sleep(remainder).await;
                    }
                }
            }
            // On failure, loop again immediately (failure-fast).
        }
    }

    async fn cancel_outstanding(&self, session: &std::sync::Arc<Session>) {
        let notify = session.coordinator().condition(Namespace::Cancel, &self.bot).await;
        session.msg(&self.bot, "XDCC CANCEL").await;
        let _ = tokio::time::timeout(CANCEL_WAIT_TIMEOUT, notify.notified()).await;
        session.coordinator().take(Namespace::Cancel, &self.bot).await;
    }

    /// `waitOnPacklist`: returns `true` once `packlists[bot]` holds a
    /// non-empty filename; loops through bot refusals.
    async fn wait_on_packlist(&mut self, session: &std::sync::Arc<Session>) -> bool {
        session.coordinator().set_last_requested_pack(&self.bot, None).await;
        loop {
            let notify = session.coordinator().condition(Namespace::Packlist, &self.bot).await;
            session
                .coordinator()
                .set_last_requested_pack(&self.bot, Some("#1".to_string()))
                .await;
            session.msg(&self.bot, "XDCC SEND #1").await;
            notify.notified().await;
            session.coordinator().take(Namespace::Packlist, &self.bot).await;

            if session.coordinator().last_requested_pack(&self.bot).await.is_none() {
                continue;
            }

            return match session.coordinator().packlist(&self.bot).await {
                Some(filename) if !filename.is_empty() => {
                    self.current_packlist = Some(filename);
                    true
                }
                _ => false,
            };
        }
    }

    /// `parseFile`: read the current packlist file, match each line against
    /// each filter predicate, and request any matching pack serially.
    async fn parse_and_request(&self, session: &std::sync::Arc<Session>) -> std::io::Result<()> {
        let Some(filename) = &self.current_packlist else {
            return Ok(());
        };
        let text = tokio::fs::read_to_string(filename).await?;
        let line_re = packlist_line();

        for filter in &self.filters {
            for line in text.lines() {
                let Some(caps) = line_re.captures(line) else {
                    continue;
                };
                let pack = caps.get(1).unwrap().as_str();
                let name = caps.get(2).unwrap().as_str();
                if filter.is_match(name) {
                    self.check_candidate(session, pack, name).await;
                }
            }
        }
        Ok(())
    }

    /// `checkCandidate`: skip if the file already exists on disk; otherwise
    /// request the pack, retrying until the dispatcher reports a definite
    /// outcome (a decline resets `lastRequestedPack` and the loop retries).
    async fn check_candidate(&self, session: &std::sync::Arc<Session>, pack: &str, name: &str) {
        {
            let guard = session.coordinator().fs_lock.lock().await;
            let exists = Path::new(name).exists();
            drop(guard);
            if exists {
                return;
            }
        }

        session.coordinator().set_last_requested_pack(&self.bot, None).await;
        loop {
            let notify = session.coordinator().condition(Namespace::Response, &self.bot).await;
            session
                .coordinator()
                .set_last_requested_pack(&self.bot, Some(pack.to_string()))
                .await;
            session.msg(&self.bot, &format!("XDCC SEND {pack}")).await;
            notify.notified().await;
            session.coordinator().take(Namespace::Response, &self.bot).await;

            if session.coordinator().last_requested_pack(&self.bot).await.is_none() {
                continue;
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packlist_line_matches_pack_dls_size_name() {
        let re = packlist_line();
        let caps = re.captures("#12  34x [700M] Some.Show.S01E01.mkv").unwrap();
        assert_eq!(&caps[1], "#12");
        assert_eq!(&caps[2], "Some.Show.S01E01.mkv");
    }

    #[test]
    fn packlist_line_requires_size_bracket() {
        let re = packlist_line();
        assert!(re.captures("#3  1x  Readme.txt").is_none());
    }

    #[test]
    fn packlist_line_does_not_swallow_a_bracketed_name_as_size() {
        let re = packlist_line();
        let caps = re
            .captures("#5  2x [700M] [HorribleSubs] Show - 01.mkv")
            .unwrap();
        assert_eq!(&caps[1], "#5");
        assert_eq!(&caps[2], "[HorribleSubs] Show - 01.mkv");
    }

    #[test]
    fn packlist_line_rejects_non_matching_text() {
        let re = packlist_line();
        assert!(re.captures("total offered: 5 packs").is_none());
    }

    #[tokio::test]
    async fn wait_on_packlist_returns_false_when_never_set() {
        let session = Session::for_test_arc();
        let mut poller = PacklistPoller::with_default_sleep("bot", vec![], false);

        let coordinator = session.coordinator().clone();
        let bot = "bot".to_string();
        tokio::spawn(async move {
            // Simulate a decline: never set packlists[bot], just notify.
            tokio::time::sleep(Duration::from_millis(10)).await;
            let notify = coordinator.condition(Namespace::Packlist, &bot).await;
            notify.notify_one();
        });

        let arrived = poller.wait_on_packlist(&session).await;
        assert!(!arrived);
    }

    #[tokio::test]
    async fn wait_on_packlist_adopts_filename_once_set() {
        let session = Session::for_test_arc();
        let mut poller = PacklistPoller::with_default_sleep("bot", vec![], false);

        let coordinator = session.coordinator().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.set_packlist("bot", "list.txt".to_string()).await;
            let notify = coordinator.condition(Namespace::Packlist, "bot").await;
            notify.notify_one();
        });

        let arrived = poller.wait_on_packlist(&session).await;
        assert!(arrived);
        assert_eq!(poller.current_packlist.as_deref(), Some("list.txt"));
    }
}
