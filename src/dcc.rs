//! The XDCC/DCC transfer engine (component C4): dials the offered data
//! socket, resolves filename conflicts under the Coordinator's filesystem
//! lock, and streams the payload to disk with rate limiting and progress
//! accounting.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::coordinator::Namespace;
use crate::message::DccSendOffer;
use crate::session::Session;

const DCC_SOCKET_TIMEOUT: Duration = Duration::from_secs(300);
const DIAL_FAILURE_PAUSE: Duration = Duration::from_secs(3);
const MD5_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Done,
    Skipped,
    Failed,
}

/// Dynamic-dispatch seam (§4.8/§9 "Dynamic dispatch of offer handling"):
/// the default downloader and the optional relay sink both implement this.
#[async_trait]
pub trait OfferHandler: Send + Sync {
    async fn handle(&self, offer: DccSendOffer, session: std::sync::Arc<Session>);
}

/// The default `OfferHandler`: actually dials and downloads the file.
pub struct Downloader;

#[async_trait]
impl OfferHandler for Downloader {
    async fn handle(&self, offer: DccSendOffer, session: std::sync::Arc<Session>) {
        run_transfer(&offer, &session).await;
    }
}

/// Run one DCC transfer to completion. Never panics; all failure paths are
/// reported through the return value and logging.
pub async fn run_transfer(offer: &DccSendOffer, session: &Session) -> TransferOutcome {
    let addr = (offer.ip, offer.port);
    tracing::info!(file = %offer.filename, %offer.ip, offer.port, "dialing DCC offer");

    let stream = match timeout(DCC_SOCKET_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "DCC dial failed");
            session.send_cancel(&offer.sender).await;
            session
                .coordinator()
                .set_last_requested_pack(&offer.sender, None)
                .await;
            tokio::time::sleep(DIAL_FAILURE_PAUSE).await;
            return TransferOutcome::Failed;
        }
        Err(_) => {
            tracing::warn!("DCC dial timed out");
            session.send_cancel(&offer.sender).await;
            session
                .coordinator()
                .set_last_requested_pack(&offer.sender, None)
                .await;
            tokio::time::sleep(DIAL_FAILURE_PAUSE).await;
            return TransferOutcome::Failed;
        }
    };

    let mut stream = stream;

    // Reconcile: filesystem critical section.
    let guard = session.coordinator().fs_lock.lock().await;
    let path = Path::new(&offer.filename);
    if path.exists() {
        if !should_overwrite(offer, session).await {
            tracing::info!(file = %offer.filename, "already exists, skipping");
            drop(guard);
            return TransferOutcome::Skipped;
        }
    }

    let file = match File::create(path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(error = %e, "failed to create destination file");
            drop(guard);
            return TransferOutcome::Failed;
        }
    };
    drop(guard);

    tracing::info!(
        file = %offer.filename,
        size = %crate::util::convert_size(offer.filesize as i64).unwrap_or_default(),
        "downloading"
    );
    write_payload(&mut stream, file, offer, session).await
}

/// `shouldOverwrite()`: `.txt` files are always candidates; if MD5 checking
/// is enabled, an equal MD5 means "do not overwrite". `shouldRename()` is
/// always false in the core — a hook for interactive use, not implemented here.
async fn should_overwrite(offer: &DccSendOffer, session: &Session) -> bool {
    if !offer.filename.ends_with(".txt") {
        return false;
    }
    if !session.md5_check_enabled() {
        return true;
    }

    let notify = session
        .coordinator()
        .condition(Namespace::Md5, &offer.sender)
        .await;
    session.send_msg(&offer.sender, "XDCC INFO #1").await;
    let woke = timeout(MD5_WAIT_TIMEOUT, notify.notified()).await.is_ok();
    session.coordinator().take(Namespace::Md5, &offer.sender).await;

    if !woke {
        return true;
    }

    match (session.coordinator().md5(&offer.sender).await, read_md5(&offer.filename).await) {
        (Some(remote), Some(local)) if remote == local => {
            tracing::info!("md5sums are equal, not replacing");
            false
        }
        _ => true,
    }
}

async fn read_md5(path: &str) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    Some(format!("{:x}", md5::compute(&bytes)))
}

async fn write_payload(
    stream: &mut TcpStream,
    mut file: File,
    offer: &DccSendOffer,
    session: &Session,
) -> TransferOutcome {
    let mut received: u64 = 0;
    let mut buf = [0u8; READ_CHUNK];
    let mut last_tick = Instant::now();
    let mut bytes_since_tick: u64 = 0;
    let start = Instant::now();

    while received < offer.filesize {
        if let Some(bucket) = session.rate_limiter() {
            if !bucket.acquire().await {
                break;
            }
        }

        let read = match timeout(DCC_SOCKET_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "DCC read error");
                return TransferOutcome::Failed;
            }
            Err(_) => {
                tracing::warn!("DCC read timed out");
                return TransferOutcome::Failed;
            }
        };

        if read == 0 {
            tracing::warn!("DCC socket closed before filesize reached");
            return TransferOutcome::Failed;
        }

        if let Err(e) = file.write_all(&buf[..read]).await {
            tracing::warn!(error = %e, "write error");
            return TransferOutcome::Failed;
        }

        received += read as u64;
        bytes_since_tick += read as u64;

        if last_tick.elapsed() >= PROGRESS_INTERVAL {
            let elapsed = last_tick.elapsed().as_secs_f64();
            let rate = bytes_since_tick as f64 / elapsed;
            let remaining = offer.filesize.saturating_sub(received) as f64;
            let eta_secs = if rate > 0.0 { remaining / rate } else { f64::INFINITY };
            tracing::debug!(
                received,
                total = offer.filesize,
                rate_bytes_per_sec = rate,
                eta_secs,
                "transfer progress"
            );
            last_tick = Instant::now();
            bytes_since_tick = 0;
        }
    }

    tracing::info!(
        file = %offer.filename,
        received,
        elapsed_secs = start.elapsed().as_secs_f64(),
        "transfer complete"
    );
    TransferOutcome::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tempfile::tempdir;
    use tokio::net::TcpListener;

    fn offer(filename: &str, filesize: u64, port: u16) -> DccSendOffer {
        DccSendOffer {
            sender: "bot".to_string(),
            filename: filename.to_string(),
            ip: Ipv4Addr::LOCALHOST,
            port,
            filesize,
        }
    }

    #[tokio::test]
    async fn downloads_full_payload_over_loopback() {
        let dir = tempdir().unwrap();
        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let payload = vec![7u8; 5000];
        let payload_clone = payload.clone();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&payload_clone).await.unwrap();
        });

        let session = Session::for_test();
        let off = offer("payload.bin", payload.len() as u64, port);
        let outcome = run_transfer(&off, &session).await;
        assert_eq!(outcome, TransferOutcome::Done);

        let written = tokio::fs::read("payload.bin").await.unwrap();
        assert_eq!(written, payload);

        std::env::set_current_dir(cwd).unwrap();
    }

    #[tokio::test]
    async fn dial_failure_returns_failed() {
        let session = Session::for_test();
        // nothing listening on this port
        let off = offer("x.bin", 10, 1);
        let outcome = run_transfer(&off, &session).await;
        assert_eq!(outcome, TransferOutcome::Failed);
    }

    #[tokio::test]
    async fn skips_existing_non_txt_file() {
        let dir = tempdir().unwrap();
        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        tokio::fs::write("existing.mkv", b"already here").await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let session = Session::for_test();
        let off = offer("existing.mkv", 4, port);
        let outcome = run_transfer(&off, &session).await;
        assert_eq!(outcome, TransferOutcome::Skipped);

        std::env::set_current_dir(cwd).unwrap();
    }
}
