//! Inbound and outbound mail payloads

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fetched message, reduced to what the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    /// RFC 822 `Message-ID` header, used for reply threading.
    pub rfc822_message_id: Option<String>,
    pub references: Option<String>,
    /// Remaining headers, keys lowercased.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// True when `address` appears in To or Cc.
    pub fn is_addressed_to(&self, address: &str) -> bool {
        let Some(wanted) = normalize_address(address) else {
            return false;
        };
        self.to
            .iter()
            .chain(self.cc.iter())
            .filter_map(|raw| normalize_address(raw))
            .any(|candidate| candidate == wanted)
    }

    /// Every address on the message (sender first), normalized and deduplicated.
    pub fn participants(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for raw in std::iter::once(&self.from).chain(self.to.iter()).chain(self.cc.iter()) {
            if let Some(address) = normalize_address(raw) {
                if !seen.contains(&address) {
                    seen.push(address);
                }
            }
        }
        seen
    }
}

/// Extract the bare, lowercased address from `Name <addr>` or `addr`.
pub fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let inner = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
        _ => trimmed,
    };
    let inner = inner.trim().trim_matches('"');
    if inner.is_empty() || !inner.contains('@') {
        return None;
    }
    Some(inner.to_ascii_lowercase())
}

/// A reply ready for the provider's send capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingReply {
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    /// Deterministic `Message-ID` used to detect an earlier successful send.
    pub rfc822_message_id: String,
}

/// Acknowledgement echoed by the provider after a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}
