pub mod money;
pub mod receipt;

pub use money::{Money, ParseMoneyError};
pub use receipt::{
    Receipt, ReceiptDate, ReceiptItem, UnvalidatedReceipt, ValidationError, UNKNOWN_DATE,
    UNKNOWN_STORE,
};
