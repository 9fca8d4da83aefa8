//! Inbound multipart SMS reassembly, keyed by `(sender, concat reference)`
//! (SPEC_FULL.md §4.3). Mirrors the teacher's `sms::multipart` /
//! `sms::mod::SMSReceiver` `Entry::Vacant`/`Entry::Occupied` shape, adapted
//! from per-process in-memory tracking to this daemon's single shared table.

use crate::message::SmsMessage;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConcatHeader {
    reference: u16,
    total: u8,
    seq: u8,
}

/// Detect and parse an 8-bit or 16-bit reference concatenation UDH.
/// Returns `None` for anything else (single-part message, or a UDH carrying
/// unrelated information elements).
fn parse_concat_udh(udh: &[u8]) -> Option<ConcatHeader> {
    if udh.len() >= 6 && udh[0] == 5 && udh[0] as usize + 1 <= udh.len() && udh[1] == 0x00 && udh[2] == 0x03 {
        return Some(ConcatHeader {
            reference: udh[3] as u16,
            total: udh[4],
            seq: udh[5],
        });
    }

    if udh.len() >= 7 && udh[0] == 6 && udh[0] as usize + 1 <= udh.len() && udh[1] == 0x08 && udh[2] == 0x04 {
        let reference = u16::from_be_bytes([udh[3], udh[4]]);
        return Some(ConcatHeader {
            reference,
            total: udh[5],
            seq: udh[6],
        });
    }

    None
}

type PartKey = (String, u16);

struct PendingParts {
    total: u8,
    parts: Vec<Option<String>>,
    received: usize,
    first: Option<SmsMessage>,
    last_updated: Instant,
}

impl PendingParts {
    fn new(total: u8) -> Self {
        Self {
            total,
            parts: vec![None; total as usize],
            received: 0,
            first: None,
            last_updated: Instant::now(),
        }
    }

    /// Returns true once every part has arrived.
    fn add(&mut self, msg: SmsMessage, seq: u8) -> bool {
        self.last_updated = Instant::now();

        let idx = (seq as usize).saturating_sub(1);
        if idx < self.parts.len() && self.parts[idx].is_none() {
            self.parts[idx] = Some(msg.text.clone());
            self.received += 1;
        }
        if self.first.is_none() {
            self.first = Some(msg);
        }

        self.received >= self.total as usize
    }

    fn compile(self) -> Option<SmsMessage> {
        let mut first = self.first?;
        first.id = uuid::Uuid::new_v4();
        first.text = self.parts.into_iter().flatten().collect();
        first.udh = None;
        Some(first)
    }

    fn is_stalled(&self, timeout: Duration) -> bool {
        self.last_updated.elapsed() > timeout
    }
}

/// Reassembly table for inbound multipart messages. Shared across the
/// inbound loop via an `Arc`; a single `tokio::sync::Mutex` guards the map,
/// matching the teacher's `SMSReceiver::multipart` field exactly.
pub struct MultipartTable {
    pending: Mutex<HashMap<PartKey, PendingParts>>,
    timeout: Duration,
    disabled: bool,
}

impl MultipartTable {
    pub fn new(timeout: Duration, disabled: bool) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
            disabled,
        }
    }

    pub fn with_default_timeout(disabled: bool) -> Self {
        Self::new(DEFAULT_TIMEOUT, disabled)
    }

    /// Offer an inbound message to the table. Returns `Some(message)`
    /// immediately for non-concatenated messages (or all messages when
    /// reassembly is disabled), and `Some(message)` once a concatenated
    /// group's final part arrives; otherwise `None` while parts are still
    /// outstanding.
    pub async fn offer(&self, msg: SmsMessage) -> Option<SmsMessage> {
        if self.disabled {
            return Some(msg);
        }

        let header = match msg.udh.as_deref().and_then(parse_concat_udh) {
            Some(h) => h,
            None => return Some(msg),
        };

        if header.total == 0 {
            warn!("dropping multipart part with total=0 from {}", msg.sender);
            return None;
        }

        let key: PartKey = (msg.sender.clone(), header.reference);
        let mut guard = self.pending.lock().await;

        match guard.entry(key) {
            Entry::Vacant(entry) => {
                debug!(
                    "new multipart group from {} ref {} expecting {} parts",
                    msg.sender, header.reference, header.total
                );
                let mut pending = PendingParts::new(header.total);
                if pending.add(msg, header.seq) {
                    pending.compile()
                } else {
                    entry.insert(pending);
                    None
                }
            }
            Entry::Occupied(mut entry) => {
                if entry.get_mut().add(msg, header.seq) {
                    let complete = entry.remove();
                    complete.compile()
                } else {
                    None
                }
            }
        }
    }

    /// Evict groups that haven't received a new part within the timeout.
    /// Called periodically by the inbound loop, never concurrently with
    /// itself (SPEC_FULL.md §9 "call only from one task").
    pub async fn sweep(&self) {
        let mut guard = self.pending.lock().await;
        let timeout = self.timeout;
        guard.retain(|(sender, reference), pending| {
            let stalled = pending.is_stalled(timeout);
            if stalled {
                warn!("discarding stalled multipart group from {sender} ref {reference}");
            }
            !stalled
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SmsKind;

    fn part(sender: &str, text: &str, udh: Vec<u8>) -> SmsMessage {
        let mut msg = SmsMessage::new(SmsKind::Mo, sender, "+200", text);
        msg.udh = Some(udh);
        msg
    }

    fn udh8(reference: u8, total: u8, seq: u8) -> Vec<u8> {
        vec![0x05, 0x00, 0x03, reference, total, seq]
    }

    fn udh16(reference: u16, total: u8, seq: u8) -> Vec<u8> {
        let [hi, lo] = reference.to_be_bytes();
        vec![0x06, 0x08, 0x04, hi, lo, total, seq]
    }

    #[tokio::test]
    async fn single_part_message_passes_through_immediately() {
        let table = MultipartTable::with_default_timeout(false);
        let msg = SmsMessage::new(SmsKind::Mo, "+100", "+200", "hi");
        let out = table.offer(msg).await;
        assert!(out.is_some());
    }

    #[tokio::test]
    async fn assembles_three_part_8bit_ref_message_in_order() {
        let table = MultipartTable::with_default_timeout(false);
        assert!(table.offer(part("+100", "one-", udh8(7, 3, 1))).await.is_none());
        assert!(table.offer(part("+100", "two-", udh8(7, 3, 2))).await.is_none());
        let result = table.offer(part("+100", "three", udh8(7, 3, 3))).await.unwrap();
        assert_eq!(result.text, "one-two-three");
        assert!(result.udh.is_none());
    }

    #[tokio::test]
    async fn assembled_message_gets_a_fresh_id() {
        let table = MultipartTable::with_default_timeout(false);
        let p1 = part("+100", "one-", udh8(7, 2, 1));
        let p2 = part("+100", "two", udh8(7, 2, 2));
        let (id1, id2) = (p1.id, p2.id);

        assert!(table.offer(p1).await.is_none());
        let result = table.offer(p2).await.unwrap();

        assert_ne!(result.id, id1);
        assert_ne!(result.id, id2);
    }

    #[tokio::test]
    async fn assembles_out_of_order_parts() {
        let table = MultipartTable::with_default_timeout(false);
        assert!(table.offer(part("+100", "C", udh8(1, 3, 3))).await.is_none());
        assert!(table.offer(part("+100", "A", udh8(1, 3, 1))).await.is_none());
        let result = table.offer(part("+100", "B", udh8(1, 3, 2))).await.unwrap();
        assert_eq!(result.text, "ABC");
    }

    #[tokio::test]
    async fn assembles_16bit_ref_message() {
        let table = MultipartTable::with_default_timeout(false);
        assert!(table.offer(part("+100", "X", udh16(1000, 2, 1))).await.is_none());
        let result = table.offer(part("+100", "Y", udh16(1000, 2, 2))).await.unwrap();
        assert_eq!(result.text, "XY");
    }

    #[tokio::test]
    async fn single_part_concat_group_completes_immediately() {
        let table = MultipartTable::with_default_timeout(false);
        let result = table.offer(part("+100", "only", udh8(9, 1, 1))).await;
        assert!(result.is_some());
        assert_eq!(result.unwrap().text, "only");
    }

    #[tokio::test]
    async fn stalled_group_is_swept_after_timeout() {
        let table = MultipartTable::new(Duration::from_millis(1), false);
        assert!(table.offer(part("+100", "A", udh8(2, 2, 1))).await.is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        table.sweep().await;

        // A fresh part with the same reference now starts a new group
        // rather than completing the discarded one.
        assert!(table.offer(part("+100", "B", udh8(2, 2, 2))).await.is_none());
    }

    #[tokio::test]
    async fn disabled_table_never_reassembles() {
        let table = MultipartTable::with_default_timeout(true);
        let out = table.offer(part("+100", "A", udh8(2, 2, 1))).await;
        assert_eq!(out.unwrap().text, "A");
    }

    #[tokio::test]
    async fn non_concat_udh_passes_through_untouched() {
        let table = MultipartTable::with_default_timeout(false);
        let out = table.offer(part("+100", "A", vec![0x02, 0xAA, 0xBB])).await;
        assert!(out.is_some());
    }

    #[tokio::test]
    async fn distinct_senders_do_not_cross_assemble() {
        let table = MultipartTable::with_default_timeout(false);
        assert!(table.offer(part("+100", "A", udh8(1, 2, 1))).await.is_none());
        assert!(table.offer(part("+200", "B", udh8(1, 2, 1))).await.is_none());
        // Neither group is complete yet; both independently awaiting seq 2.
        assert!(table.offer(part("+100", "A2", udh8(1, 2, 2))).await.is_some());
    }
}
