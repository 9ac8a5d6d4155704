pub mod db;

pub use db::{create_db, get_receipt, list_receipts, save_receipt, DbPool, ReceiptRecord};
