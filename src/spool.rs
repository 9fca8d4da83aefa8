//! Crash-safe on-disk spool for outbound messages the bearer link couldn't
//! accept. Append-only, length-prefixed records (SPEC_FULL.md §4.5), the
//! Rust-native counterpart of the original's `store_pending_msg` /
//! `load_pending_msgs` / `retry_pending_msgs`.
//!
//! The original used the host's native `long` as the length prefix; this
//! implementation fixes it to little-endian `u64` for portability across
//! spool files written by different builds (documented in DESIGN.md).

use crate::message::SmsMessage;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{error, warn};

const MAX_RECORD_LEN: u64 = 1024 * 1024;

/// On-disk representation of a spooled message. A thin, stable subset of
/// `SmsMessage` — intentionally decoupled so renaming in-memory fields
/// doesn't silently change the spool's wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolRecord {
    sender: String,
    receiver: String,
    text: String,
    udh: Option<Vec<u8>>,
    coding: u8,
    mclass: u8,
    priority: u8,
    dlr_mask: u8,
    validity: i64,
    deferred: i64,
    smsc_route: Option<String>,
}

impl From<&SmsMessage> for SpoolRecord {
    fn from(msg: &SmsMessage) -> Self {
        Self {
            sender: msg.sender.clone(),
            receiver: msg.receiver.clone(),
            text: msg.text.clone(),
            udh: msg.udh.clone(),
            coding: msg.coding,
            mclass: msg.mclass,
            priority: msg.priority,
            dlr_mask: msg.dlr_mask,
            validity: msg.validity,
            deferred: msg.deferred,
            smsc_route: msg.smsc_route.clone(),
        }
    }
}

impl SpoolRecord {
    fn into_message(self) -> SmsMessage {
        let mut msg = SmsMessage::new(crate::message::SmsKind::MtPush, self.sender, self.receiver, self.text);
        msg.udh = self.udh;
        msg.coding = self.coding;
        msg.mclass = self.mclass;
        msg.priority = self.priority;
        msg.dlr_mask = self.dlr_mask;
        msg.validity = self.validity;
        msg.deferred = self.deferred;
        msg.smsc_route = self.smsc_route;
        msg
    }
}

/// Append-only spool file. `None` means spooling is disabled
/// (`store-file` unset in config); all operations become no-ops.
pub struct Spool {
    path: Option<PathBuf>,
    append_lock: Mutex<()>,
}

impl Spool {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            append_lock: Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Append a single message to the spool file. No-op if spooling is
    /// disabled.
    pub async fn append(&self, msg: &SmsMessage) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let record = SpoolRecord::from(msg);
        let bytes = bincode::serialize(&record).context("failed to serialize spool record")?;
        let len = bytes.len() as u64;

        let _guard = self.append_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open spool file {}", path.display()))?;

        file.write_all(&len.to_le_bytes()).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every record out of the spool file and truncate it on success.
    /// Stops at the first corrupt record (length `0` or greater than
    /// `MAX_RECORD_LEN`) and leaves the file untouched in that case, so the
    /// well-formed prefix isn't lost — matching the original's "abort the
    /// load on a corrupt entry rather than guess" behaviour.
    pub async fn drain(&self) -> Result<Vec<SmsMessage>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };

        if !path.exists() {
            return Ok(Vec::new());
        }

        let messages = read_all(path).await?;

        let _guard = self.append_lock.lock().await;
        fs::remove_file(path)
            .await
            .with_context(|| format!("failed to truncate spool file {}", path.display()))?;

        Ok(messages)
    }

    /// Attempt to re-deliver every spooled message via `send`. Messages
    /// that fail to send are re-appended so they aren't lost; no backoff
    /// is applied between attempts, matching the original's immediate
    /// best-effort retry.
    pub async fn retry<F, Fut>(&self, mut send: F) -> Result<usize>
    where
        F: FnMut(SmsMessage) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        if !self.is_enabled() {
            return Ok(0);
        }

        let pending = self.drain().await?;
        let mut delivered = 0;

        for msg in pending {
            match send(msg.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("retry of spooled message to {} failed, re-spooling: {e}", msg.receiver);
                    self.append(&msg).await?;
                }
            }
        }

        Ok(delivered)
    }
}

async fn read_all(path: &Path) -> Result<Vec<SmsMessage>> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("failed to open spool file {}", path.display()))?;

    let mut messages = Vec::new();
    loop {
        let mut len_buf = [0u8; 8];
        match file.read_exact(&mut len_buf).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("failed to read spool record length"),
        }

        let len = u64::from_le_bytes(len_buf);
        if len == 0 || len > MAX_RECORD_LEN {
            error!("spool file {} contains a corrupt record (length {len}), stopping read", path.display());
            break;
        }

        let mut body = vec![0u8; len as usize];
        match file.read_exact(&mut body).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                error!("spool file {} truncated mid-record, stopping read", path.display());
                break;
            }
            Err(e) => return Err(e).context("failed to read spool record body"),
        }

        match bincode::deserialize::<SpoolRecord>(&body) {
            Ok(record) => messages.push(record.into_message()),
            Err(e) => {
                error!("spool file {} contains an undeserializable record: {e}, stopping read", path.display());
                break;
            }
        }
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SmsKind;
    use std::io::Write as _;

    fn sample(text: &str) -> SmsMessage {
        SmsMessage::new(SmsKind::MtPush, "+100", "+200", text)
    }

    #[tokio::test]
    async fn append_then_drain_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.bin");
        let spool = Spool::new(Some(path.clone()));

        spool.append(&sample("one")).await.unwrap();
        spool.append(&sample("two")).await.unwrap();

        let drained = spool.drain().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text, "one");
        assert_eq!(drained[1].text, "two");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn drain_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        let spool = Spool::new(Some(path));
        assert_eq!(spool.drain().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn disabled_spool_is_always_a_no_op() {
        let spool = Spool::new(None);
        spool.append(&sample("x")).await.unwrap();
        assert_eq!(spool.drain().await.unwrap().len(), 0);
        assert!(!spool.is_enabled());
    }

    #[tokio::test]
    async fn corrupt_length_prefix_stops_read_without_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.bin");

        let mut std_file = std::fs::File::create(&path).unwrap();
        let record = SpoolRecord::from(&sample("good"));
        let bytes = bincode::serialize(&record).unwrap();
        std_file.write_all(&(bytes.len() as u64).to_le_bytes()).unwrap();
        std_file.write_all(&bytes).unwrap();
        // Corrupt second record: absurd length.
        std_file.write_all(&(MAX_RECORD_LEN + 1).to_le_bytes()).unwrap();

        let spool = Spool::new(Some(path));
        let drained = spool.drain().await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].text, "good");
    }

    #[tokio::test]
    async fn retry_redelivers_and_respools_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.bin");
        let spool = Spool::new(Some(path));

        spool.append(&sample("ok")).await.unwrap();
        spool.append(&sample("fail")).await.unwrap();

        let delivered = spool
            .retry(|msg| async move {
                if msg.text == "fail" {
                    anyhow::bail!("simulated failure")
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        let remaining = spool.drain().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text, "fail");
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.bin");
        let spool = std::sync::Arc::new(Spool::new(Some(path)));

        let mut handles = Vec::new();
        for i in 0..10 {
            let spool = spool.clone();
            handles.push(tokio::spawn(async move {
                spool.append(&sample(&format!("msg-{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let drained = spool.drain().await.unwrap();
        assert_eq!(drained.len(), 10);
    }
}
