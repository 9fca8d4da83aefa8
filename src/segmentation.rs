//! Outbound long-message segmentation with 8-bit-reference concatenation
//! UDHs (SPEC_FULL.md §4.4).

use crate::message::SmsMessage;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::warn;

/// Monotonically-incrementing, process-wide concat reference counter.
/// Owned by `Daemon` and threaded through the outbound loop rather than a
/// file-scope global (SPEC_FULL.md §9 "Global mutable state").
#[derive(Debug, Default)]
pub struct RefCounter(AtomicU8);

impl RefCounter {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    fn next(&self) -> u8 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Split `msg` into concatenated parts if it needs segmentation, or return
/// it unchanged as a single-element vec otherwise.
///
/// Only applies when `msg.udh` is absent and the text exceeds the per-part
/// capacity for its coding (160 chars for GSM-7/binary, 70 for UCS-2).
pub fn segment_if_needed(msg: SmsMessage, refs: &RefCounter) -> Vec<SmsMessage> {
    if msg.udh.is_some() {
        return vec![msg];
    }

    let capacity = msg.part_capacity();
    let chars: Vec<char> = msg.text.chars().collect();
    if chars.len() <= capacity {
        return vec![msg];
    }

    let total = chars.len().div_ceil(capacity);
    if total == 0 || total > 255 {
        warn!("segmentation produced an invalid part count ({total}), sending as-is");
        return vec![msg];
    }

    let ref_byte = refs.next();
    let total_u8 = total as u8;

    let parts: Vec<SmsMessage> = chars
        .chunks(capacity)
        .enumerate()
        .map(|(idx, chunk)| {
            let seq = (idx + 1) as u8;
            let mut part = msg.clone();
            part.id = uuid::Uuid::new_v4();
            part.text = chunk.iter().collect();
            part.udh = Some(vec![0x05, 0x00, 0x03, ref_byte, total_u8, seq]);
            part
        })
        .collect();

    if parts.is_empty() {
        warn!("segmentation returned zero parts, sending original message as-is");
        return vec![msg];
    }

    parts
}
