use tally_core::{
    Money, Receipt, ReceiptDate, UnvalidatedReceipt, ValidationError, UNKNOWN_STORE,
};

use crate::types::{ExtractedFields, MissingStorePolicy};

/// Turns a field map into a validated [`Receipt`].
///
/// Defaults are applied first (total → 0, unusable date → sentinel), then the
/// store-name policy, then the receipt invariants.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiptAssembler {
    missing_store: MissingStorePolicy,
}

impl ReceiptAssembler {
    pub fn new(missing_store: MissingStorePolicy) -> Self {
        Self { missing_store }
    }

    pub fn assemble(&self, fields: ExtractedFields) -> Result<Receipt, ValidationError> {
        let total_price = fields.total_price.unwrap_or_else(Money::zero);
        let date = fields
            .date
            .as_deref()
            .map(ReceiptDate::lenient)
            .unwrap_or_default();

        let store_name = match (fields.store_name, self.missing_store) {
            (Some(name), MissingStorePolicy::Reject) if name == UNKNOWN_STORE => {
                return Err(ValidationError::MissingStoreName);
            }
            (Some(name), _) => name,
            (None, MissingStorePolicy::Sentinel) => UNKNOWN_STORE.to_string(),
            (None, MissingStorePolicy::Reject) => return Err(ValidationError::MissingStoreName),
        };

        let receipt = Receipt::validate(UnvalidatedReceipt {
            store_name,
            total_price,
            date,
            items: fields.items,
        })?;

        tracing::info!(
            store = receipt.store_name(),
            total = %receipt.total_price(),
            date = %receipt.date(),
            items = receipt.items().len(),
            "receipt assembled"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tally_core::{ReceiptItem, UNKNOWN_DATE};

    fn fields(store: Option<&str>, total_minor: Option<i64>, date: Option<&str>) -> ExtractedFields {
        ExtractedFields {
            store_name: store.map(str::to_string),
            total_price: total_minor.map(Money::from_minor_units),
            date: date.map(str::to_string),
            items: vec![],
        }
    }

    #[test]
    fn assembles_complete_fields() {
        let mut f = fields(Some("いせやフーズクラブ"), Some(120_000), Some("2024-12-07"));
        f.items = vec![ReceiptItem::new("123456", "牛乳", "198")];
        let r = ReceiptAssembler::default().assemble(f).unwrap();
        assert_eq!(r.store_name(), "いせやフーズクラブ");
        assert_eq!(r.total_price(), Money::from_minor_units(120_000));
        assert_eq!(r.date().known(), NaiveDate::from_ymd_opt(2024, 12, 7));
        assert_eq!(r.items().len(), 1);
    }

    #[test]
    fn negative_total_is_rejected() {
        let f = fields(Some("Shop"), Some(-1), None);
        assert!(matches!(
            ReceiptAssembler::default().assemble(f),
            Err(ValidationError::NegativeTotal(_))
        ));
    }

    #[test]
    fn zero_total_and_default_store_are_accepted() {
        let r = ReceiptAssembler::default().assemble(fields(None, Some(0), None)).unwrap();
        assert_eq!(r.store_name(), UNKNOWN_STORE);
        assert!(r.total_price().is_zero());
    }

    #[test]
    fn missing_total_defaults_to_zero() {
        let r = ReceiptAssembler::default().assemble(fields(Some("Shop"), None, None)).unwrap();
        assert!(r.total_price().is_zero());
    }

    #[test]
    fn missing_or_invalid_date_becomes_sentinel() {
        let a = ReceiptAssembler::default();
        for date in [None, Some(UNKNOWN_DATE), Some("2024-13-07"), Some("next tuesday")] {
            let r = a.assemble(fields(Some("Shop"), None, date)).unwrap();
            assert_eq!(r.date(), ReceiptDate::Unknown, "date input {date:?}");
        }
    }

    #[test]
    fn blank_store_is_rejected_under_either_policy() {
        for policy in [MissingStorePolicy::Sentinel, MissingStorePolicy::Reject] {
            let err = ReceiptAssembler::new(policy)
                .assemble(fields(Some("   "), None, None))
                .unwrap_err();
            assert_eq!(err, ValidationError::BlankStoreName);
        }
    }

    #[test]
    fn reject_policy_refuses_missing_store() {
        let a = ReceiptAssembler::new(MissingStorePolicy::Reject);
        assert_eq!(
            a.assemble(fields(None, Some(100), None)).unwrap_err(),
            ValidationError::MissingStoreName
        );
        assert_eq!(
            a.assemble(fields(Some(UNKNOWN_STORE), Some(100), None)).unwrap_err(),
            ValidationError::MissingStoreName
        );
        assert!(a.assemble(fields(Some("Shop"), Some(100), None)).is_ok());
    }
}
