use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use super::money::Money;

pub const UNKNOWN_STORE: &str = "Unknown Store";
pub const UNKNOWN_DATE: &str = "Unknown Date";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One product line as printed on the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItem {
    /// Fixed-width product code.
    pub code: String,
    pub name: String,
    /// Decimal string without currency marker or separators.
    pub price: String,
    /// Raw quantity marker (`X2点`, `3P`), only when one was printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
}

impl ReceiptItem {
    pub fn new(code: &str, name: &str, price: &str) -> Self {
        ReceiptItem {
            code: code.to_string(),
            name: name.to_string(),
            price: price.to_string(),
            quantity: None,
        }
    }

    pub fn with_quantity(mut self, quantity: &str) -> Self {
        self.quantity = Some(quantity.to_string());
        self
    }
}

/// Purchase date, or the `"Unknown Date"` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiptDate {
    Known(NaiveDate),
    #[default]
    Unknown,
}

impl ReceiptDate {
    /// Strict parse: canonical `YYYY-MM-DD` or the sentinel, nothing else.
    pub fn parse(s: &str) -> Option<Self> {
        if s == UNKNOWN_DATE {
            return Some(ReceiptDate::Unknown);
        }
        // chrono accepts unpadded fields; the canonical form does not.
        if s.len() != 10 {
            return None;
        }
        NaiveDate::parse_from_str(s, DATE_FORMAT).ok().map(ReceiptDate::Known)
    }

    /// Anything that is not a canonical, real calendar date becomes `Unknown`.
    pub fn lenient(s: &str) -> Self {
        Self::parse(s).unwrap_or(ReceiptDate::Unknown)
    }

    pub fn known(self) -> Option<NaiveDate> {
        match self {
            ReceiptDate::Known(d) => Some(d),
            ReceiptDate::Unknown => None,
        }
    }
}

impl fmt::Display for ReceiptDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiptDate::Known(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            ReceiptDate::Unknown => write!(f, "{UNKNOWN_DATE}"),
        }
    }
}

impl Serialize for ReceiptDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReceiptDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ReceiptDate::parse(&s).ok_or_else(|| {
            serde::de::Error::custom(format!("expected YYYY-MM-DD or '{UNKNOWN_DATE}', got '{s}'"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Store name is blank")]
    BlankStoreName,
    #[error("Store name could not be determined")]
    MissingStoreName,
    #[error("Total price is negative: {0}")]
    NegativeTotal(Money),
    #[error("Item {index} is invalid: {reason}")]
    InvalidItem { index: usize, reason: String },
}

/// Fields as assembled, before invariants are checked.
#[derive(Debug, Clone)]
pub struct UnvalidatedReceipt {
    pub store_name: String,
    pub total_price: Money,
    pub date: ReceiptDate,
    pub items: Vec<ReceiptItem>,
}

/// A scanned receipt whose invariants have been checked.
///
/// Only obtainable through [`Receipt::validate`], and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    store_name: String,
    total_price: Money,
    date: ReceiptDate,
    items: Vec<ReceiptItem>,
}

impl Receipt {
    pub fn validate(raw: UnvalidatedReceipt) -> Result<Receipt, ValidationError> {
        let store_name = raw.store_name.trim();
        if store_name.is_empty() {
            return Err(ValidationError::BlankStoreName);
        }

        if raw.total_price.is_negative() {
            return Err(ValidationError::NegativeTotal(raw.total_price));
        }

        for (index, item) in raw.items.iter().enumerate() {
            if item.code.trim().is_empty() {
                return Err(ValidationError::InvalidItem { index, reason: "empty code".into() });
            }
            if item.name.trim().is_empty() {
                return Err(ValidationError::InvalidItem { index, reason: "empty name".into() });
            }
        }

        Ok(Receipt {
            store_name: store_name.to_string(),
            total_price: raw.total_price,
            date: raw.date,
            items: raw.items,
        })
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn date(&self) -> ReceiptDate {
        self.date
    }

    pub fn items(&self) -> &[ReceiptItem] {
        &self.items
    }
}

impl<'de> Deserialize<'de> for Receipt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            store_name: String,
            total_price: Money,
            date: ReceiptDate,
            #[serde(default)]
            items: Vec<ReceiptItem>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Receipt::validate(UnvalidatedReceipt {
            store_name: raw.store_name,
            total_price: raw.total_price,
            date: raw.date,
            items: raw.items,
        })
        .map_err(serde::de::Error::custom)
    }
}
