//! Error type for the Bluetooth components and the user-facing classifier
//! for raw BlueZ error text.

use std::sync::OnceLock;

use regex::Regex;

use super::types::DeviceOperation;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No adapter, no session, or the adapter vanished mid-operation.
    #[error("Bluetooth unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("not a device object path: {0}")]
    InvalidPath(String),

    /// A device operation failed; `message` is already classified.
    #[error("{operation} failed: {message}")]
    Operation {
        operation: DeviceOperation,
        message: String,
    },

    #[error(transparent)]
    Stack(#[from] bluer::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Text suitable for showing to the operator.
    pub fn user_message(&self) -> String {
        match self {
            Error::Operation { message, .. } => message.clone(),
            Error::Stack(e) => classify(&raw_message(e)),
            other => other.to_string(),
        }
    }

    /// The stack reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Stack(bluer::Error {
                kind: bluer::ErrorKind::DoesNotExist,
                ..
            })
        )
    }
}

/// BlueZ error name and message in one string, e.g.
/// `AuthenticationRejected: Authentication Rejected`.
pub fn raw_message(e: &bluer::Error) -> String {
    if e.message.is_empty() {
        format!("{:?}", e.kind)
    } else {
        format!("{:?}: {}", e.kind, e.message)
    }
}

/// Ordered (pattern, message) table. First match wins.
const RULES: &[(&str, &str)] = &[
    (
        r"(?i)host is down|page[- ]?timeout|no route to host",
        "Device is not in range or powered off",
    ),
    (r"(?i)connection[- ]refused", "Connection refused by the device"),
    (r"(?i)connection[- ]abort", "Connection was aborted"),
    (r"(?i)in ?progress", "Operation already in progress"),
    (r"(?i)not ?ready", "Bluetooth adapter is not ready"),
    (r"(?i)authentication ?failed", "Authentication failed"),
    (r"(?i)authentication ?cancell?ed", "Authentication was cancelled"),
    (
        r"(?i)authentication ?rejected",
        "Authentication was rejected by the device",
    ),
    (r"(?i)authentication ?time", "Authentication timed out"),
    (r"(?i)connection ?attempt ?failed", "Connection attempt failed"),
];

fn rules() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|(pattern, message)| {
                let re = Regex::new(pattern).expect("classifier patterns are valid");
                (re, *message)
            })
            .collect()
    })
}

/// Map raw stack error text onto an operator-facing message.
///
/// Unknown messages are not suppressed: the last colon-delimited segment is
/// returned, or the whole text if that segment is empty.
pub fn classify(raw: &str) -> String {
    if let Some((_, message)) = rules().iter().find(|(re, _)| re.is_match(raw)) {
        return (*message).to_string();
    }
    match raw.rsplit(':').next().map(str::trim) {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => raw.trim().to_string(),
    }
}
