use serde::{Deserialize, Serialize};
use tally_core::{Money, ReceiptItem};

/// Field map produced by extraction and consumed by assembly.
///
/// Every field is optional so a map built elsewhere (e.g. deserialized from
/// JSON) can be assembled under the same defaulting rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub total_price: Option<Money>,
    /// Canonical `YYYY-MM-DD` text, the sentinel, or anything else a caller
    /// supplied; assembly decides what is usable.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,
}

/// One store-name rule. Higher `priority` is tried first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreMatcher {
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub kind: MatcherKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherKind {
    /// The literal store name appears somewhere in the text.
    Literal { name: String },
    /// `label: value`; the value up to the next whitespace is the name.
    Labeled { label: String },
    /// Capture group 1 if present, otherwise the whole match.
    Regex { pattern: String },
}

impl StoreMatcher {
    pub fn literal(name: &str, priority: i32) -> Self {
        StoreMatcher { priority, kind: MatcherKind::Literal { name: name.to_string() } }
    }

    pub fn labeled(label: &str, priority: i32) -> Self {
        StoreMatcher { priority, kind: MatcherKind::Labeled { label: label.to_string() } }
    }

    pub fn regex(pattern: &str, priority: i32) -> Self {
        StoreMatcher { priority, kind: MatcherKind::Regex { pattern: pattern.to_string() } }
    }

    /// Labels seen on the receipts this pipeline was tuned for.
    pub fn defaults() -> Vec<StoreMatcher> {
        vec![
            StoreMatcher::labeled("Store Name", 10),
            StoreMatcher::labeled("店舗名", 5),
            StoreMatcher::labeled("店名", 5),
        ]
    }
}

/// What assembly does when no store name was extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStorePolicy {
    /// Substitute `"Unknown Store"`.
    #[default]
    Sentinel,
    /// Fail with `ValidationError::MissingStoreName`.
    Reject,
}

impl std::fmt::Display for MissingStorePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingStorePolicy::Sentinel => write!(f, "sentinel"),
            MissingStorePolicy::Reject => write!(f, "reject"),
        }
    }
}
