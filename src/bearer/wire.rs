//! Wire encoding for frames exchanged with the bearer server. The spec
//! treats this framing as opaque/library-provided (§10 "bearer wire
//! framing"); this is a self-consistent encoding of exactly the fields the
//! spec defines, carried over `tokio_util::codec::LengthDelimitedCodec`.

use serde::{Deserialize, Serialize};

/// A single SMS/MO/DLR payload as exchanged with the bearer server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSms {
    pub kind: WireKind,
    pub sender: String,
    pub receiver: String,
    pub text: String,
    pub udh: Option<Vec<u8>>,
    pub coding: u8,
    pub mclass: u8,
    pub priority: u8,
    pub dlr_mask: u8,
    pub validity: i64,
    pub deferred: i64,
    pub smsc_route: Option<String>,
    pub box_id: Option<String>,
    pub dlr_status: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireKind {
    MtPush,
    Mo,
    ReportMo,
}

/// Administrative commands the bearer server can accept or emit, carried
/// alongside SMS traffic on the same framed connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdminCommand {
    Identify { box_id: String },
    Shutdown,
    Restart,
}

/// Every frame exchanged on the bearer socket is one of these two shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BearerFrame {
    Sms(WireSms),
    Admin(AdminCommand),
}

impl BearerFrame {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        bincode::serialize(self).map_err(Into::into)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        bincode::deserialize(bytes).map_err(Into::into)
    }
}
