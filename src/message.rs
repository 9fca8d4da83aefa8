//! The in-memory SMS representation shared by both pipeline directions, and
//! the JSON envelope encode/decode at the broker boundary (SPEC_FULL.md §3, §6).

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Direction/origin of a message, mirroring the original `sms_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmsKind {
    MtPush,
    Mo,
    ReportMo,
    Other,
}

/// The message that flows through the pipeline in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct SmsMessage {
    pub id: Uuid,
    pub kind: SmsKind,
    pub sender: String,
    pub receiver: String,
    pub text: String,
    pub udh: Option<Vec<u8>>,
    pub coding: u8,
    pub mclass: u8,
    pub priority: u8,
    pub dlr_mask: u8,
    /// Absolute unix timestamp, `-1` if unset.
    pub validity: i64,
    /// Absolute unix timestamp, `-1` if unset.
    pub deferred: i64,
    pub smsc_route: Option<String>,
    pub box_id: Option<String>,
    pub charset: Option<String>,
    /// Only meaningful for `ReportMo`; carried through from the bearer's
    /// TP-Status-equivalent field so it can be echoed as `dlr-type`.
    pub dlr_status: Option<u8>,
}

impl SmsMessage {
    /// A bare outbound skeleton, as used when constructing synthesised
    /// multipart-assembled or split messages.
    pub fn new(kind: SmsKind, sender: impl Into<String>, receiver: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender: sender.into(),
            receiver: receiver.into(),
            text: text.into(),
            udh: None,
            coding: 0,
            mclass: 0,
            priority: 0,
            dlr_mask: 0,
            validity: -1,
            deferred: -1,
            smsc_route: None,
            box_id: None,
            charset: None,
            dlr_status: None,
        }
    }

    /// Per-part capacity in octets, before segmentation, per coding.
    pub fn part_capacity(&self) -> usize {
        if self.coding == 2 {
            70
        } else {
            160
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Raw shape of an outbound `sms.send` JSON body (SPEC_FULL.md §6).
#[derive(Debug, Deserialize)]
struct OutboundRequest {
    from: Option<String>,
    to: Option<String>,
    text: Option<String>,
    #[serde(rename = "smsc-id")]
    smsc_id: Option<String>,
    udh: Option<String>,
    charset: Option<String>,
    #[serde(default)]
    coding: i64,
    #[serde(default)]
    mclass: i64,
    #[serde(rename = "dlr-mask", default)]
    dlr_mask: i64,
    #[serde(default)]
    priority: i64,
    #[serde(default = "default_unset")]
    validity: i64,
    #[serde(default = "default_unset")]
    deferred: i64,
}

fn default_unset() -> i64 {
    -1
}

/// Decode an outbound `sms.send` JSON body into an `SmsMessage`.
///
/// Returns `None` if the body doesn't parse as JSON or is missing any of
/// the three required fields (`from`, `to`, `text`) — callers publish the
/// original raw body to `sms.failed` in that case.
pub fn decode_outbound(body: &[u8], default_route: Option<&str>) -> Option<SmsMessage> {
    let parsed: OutboundRequest = serde_json::from_slice(body).ok()?;

    let from = parsed.from?;
    let to = parsed.to?;
    let text = parsed.text?;
    if from.is_empty() || to.is_empty() {
        return None;
    }

    let mut msg = SmsMessage::new(SmsKind::MtPush, from, to, text);
    msg.coding = parsed.coding.clamp(0, 2) as u8;
    msg.mclass = parsed.mclass.max(0) as u8;
    msg.dlr_mask = parsed.dlr_mask.max(0) as u8;
    msg.priority = parsed.priority.max(0) as u8;
    msg.charset = parsed.charset;

    msg.smsc_route = parsed
        .smsc_id
        .or_else(|| default_route.map(|s| s.to_string()));

    if let Some(hex_udh) = parsed.udh {
        match hex::decode(&hex_udh) {
            Ok(bytes) => msg.udh = Some(bytes),
            Err(e) => {
                tracing::warn!("dropping invalid UDH hex '{hex_udh}': {e}");
            }
        }
    }

    if parsed.validity >= 0 {
        msg.validity = now_unix() + parsed.validity * 60;
    }
    if parsed.deferred >= 0 {
        msg.deferred = now_unix() + parsed.deferred * 60;
    }

    Some(msg)
}

/// Inbound envelope produced on `sms.mo` / `sms.dlr`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub from: String,
    pub to: String,
    pub text: String,
    #[serde(rename = "smsc-id", skip_serializing_if = "Option::is_none")]
    pub smsc_id: Option<String>,
    pub coding: i64,
    #[serde(rename = "dlr-type", skip_serializing_if = "Option::is_none")]
    pub dlr_type: Option<i64>,
    pub timestamp: i64,
}

/// Encode an `SmsMessage` for publication on `sms.mo` (`kind == "mo"`) or
/// `sms.dlr` (`kind == "dlr"`).
pub fn encode_inbound(msg: &SmsMessage, kind: &str) -> Vec<u8> {
    let envelope = InboundEnvelope {
        kind: kind.to_string(),
        id: msg.id.to_string(),
        from: msg.sender.clone(),
        to: msg.receiver.clone(),
        text: msg.text.clone(),
        smsc_id: msg.smsc_route.clone(),
        coding: msg.coding as i64,
        dlr_type: if kind == "dlr" {
            Some(msg.dlr_status.unwrap_or(msg.dlr_mask) as i64)
        } else {
            None
        },
        timestamp: now_unix(),
    };

    serde_json::to_vec(&envelope).expect("InboundEnvelope always serializes")
}

/// Build the `sms.failed` payload for a message that failed to parse.
pub fn failed_invalid_format(original: &[u8]) -> Vec<u8> {
    let original_str = String::from_utf8_lossy(original);
    serde_json::json!({
        "error": "Invalid message format",
        "original": original_str,
    })
    .to_string()
    .into_bytes()
}

/// Build the `sms.failed` payload for a sender-not-authorized rejection.
pub fn failed_sender_not_authorized(from: &str, to: &str) -> Vec<u8> {
    serde_json::json!({
        "error": "Sender not authorized",
        "from": from,
        "to": to,
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_minimal_outbound() {
        let body = br#"{"from":"A","to":"B","text":"hi"}"#;
        let msg = decode_outbound(body, None).unwrap();
        assert_eq!(msg.sender, "A");
        assert_eq!(msg.receiver, "B");
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.coding, 0);
        assert_eq!(msg.kind, SmsKind::MtPush);
        assert_eq!(msg.validity, -1);
        assert_eq!(msg.deferred, -1);
    }

    #[test]
    fn decode_missing_required_field_rejected() {
        let body = br#"{"to":"B","text":"hi"}"#;
        assert!(decode_outbound(body, None).is_none());
    }

    #[test]
    fn decode_not_json_rejected() {
        assert!(decode_outbound(b"not json", None).is_none());
    }

    #[test]
    fn smsc_route_falls_back_to_default() {
        let body = br#"{"from":"A","to":"B","text":"hi"}"#;
        let msg = decode_outbound(body, Some("smsc-1")).unwrap();
        assert_eq!(msg.smsc_route.as_deref(), Some("smsc-1"));

        let body2 = br#"{"from":"A","to":"B","text":"hi","smsc-id":"smsc-2"}"#;
        let msg2 = decode_outbound(body2, Some("smsc-1")).unwrap();
        assert_eq!(msg2.smsc_route.as_deref(), Some("smsc-2"));
    }

    #[test]
    fn valid_udh_hex_roundtrips() {
        let body = br#"{"from":"A","to":"B","text":"hi","udh":"050003ab0201"}"#;
        let msg = decode_outbound(body, None).unwrap();
        assert_eq!(msg.udh, Some(hex::decode("050003ab0201").unwrap()));
    }

    #[test]
    fn invalid_udh_hex_is_dropped_not_fatal() {
        let body = br#"{"from":"A","to":"B","text":"hi","udh":"zz"}"#;
        let msg = decode_outbound(body, None).unwrap();
        assert_eq!(msg.udh, None);
    }

    #[test]
    fn validity_and_deferred_minutes_convert_to_absolute() {
        let body = br#"{"from":"A","to":"B","text":"hi","validity":10,"deferred":5}"#;
        let before = now_unix();
        let msg = decode_outbound(body, None).unwrap();
        assert!(msg.validity >= before + 600);
        assert!(msg.deferred >= before + 300);
    }

    #[test]
    fn encode_inbound_mo_roundtrips_core_fields() {
        let mut msg = SmsMessage::new(SmsKind::Mo, "+100", "+200", "hello");
        msg.smsc_route = Some("smsc-1".to_string());
        msg.coding = 1;

        let body = encode_inbound(&msg, "mo");
        let decoded: InboundEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.kind, "mo");
        assert_eq!(decoded.from, "+100");
        assert_eq!(decoded.to, "+200");
        assert_eq!(decoded.text, "hello");
        assert_eq!(decoded.smsc_id.as_deref(), Some("smsc-1"));
        assert_eq!(decoded.coding, 1);
        assert_eq!(decoded.dlr_type, None);
    }

    #[test]
    fn encode_inbound_dlr_has_dlr_type() {
        let mut msg = SmsMessage::new(SmsKind::ReportMo, "+100", "+200", "");
        msg.dlr_status = Some(2);

        let body = encode_inbound(&msg, "dlr");
        let decoded: InboundEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.kind, "dlr");
        assert_eq!(decoded.dlr_type, Some(2));
    }
}
