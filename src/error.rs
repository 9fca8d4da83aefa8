use std::fmt;

/// Coarse error taxonomy used where callers need to branch on the kind of
/// failure rather than just propagate it (see SPEC_FULL.md §7).
#[derive(Debug)]
pub enum BridgeError {
    /// Broker/bearer I/O, timeouts, disconnects. Recovered locally by the
    /// caller marking its link disconnected and re-driving reconnect.
    TransientNetwork(anyhow::Error),

    /// Unparsable JSON or a missing required field.
    MalformedInput(String),

    /// Sender not present in the allow-list.
    PolicyReject(String),

    /// An internal invariant was violated (e.g. a spool record length out
    /// of range). Logged as an error; the daemon continues.
    InternalInvariant(String),

    /// Configuration load failure or an unrecoverable initial connect.
    /// Causes process exit with a non-zero status.
    Fatal(anyhow::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::TransientNetwork(e) => write!(f, "transient network error: {e:?}"),
            BridgeError::MalformedInput(msg) => write!(f, "malformed input: {msg}"),
            BridgeError::PolicyReject(msg) => write!(f, "policy reject: {msg}"),
            BridgeError::InternalInvariant(msg) => write!(f, "internal invariant violated: {msg}"),
            BridgeError::Fatal(e) => write!(f, "fatal: {e:?}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::TransientNetwork(e) | BridgeError::Fatal(e) => e.source(),
            _ => None,
        }
    }
}
