use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use tally_core::{Money, Receipt, ReceiptDate, ReceiptItem, UnvalidatedReceipt};

pub type DbPool = Pool<Sqlite>;

/// One row of the receipt list, without its items.
#[derive(Debug, Clone)]
pub struct ReceiptRecord {
    pub id: i64,
    pub store_name: String,
    pub total_price: Money,
    pub date: ReceiptDate,
    pub item_count: i64,
    pub created_at: String,
}

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            store_name TEXT NOT NULL,
            total_price TEXT NOT NULL,
            date TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipt_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            price TEXT NOT NULL,
            quantity TEXT,
            FOREIGN KEY (receipt_id) REFERENCES receipts(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_receipt_items_receipt ON receipt_items(receipt_id, position)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a validated receipt and its items atomically. Returns the new id.
pub async fn save_receipt(pool: &DbPool, receipt: &Receipt) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO receipts (store_name, total_price, date) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(receipt.store_name())
    .bind(receipt.total_price().to_string())
    .bind(receipt.date().to_string())
    .fetch_one(&mut *tx)
    .await?;

    for (position, item) in receipt.items().iter().enumerate() {
        sqlx::query(
            "INSERT INTO receipt_items (receipt_id, position, code, name, price, quantity) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(position as i64)
        .bind(&item.code)
        .bind(&item.name)
        .bind(&item.price)
        .bind(item.quantity.as_deref())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(id)
}

/// Load a receipt with its items. Stored rows are validated again on the way out.
pub async fn get_receipt(pool: &DbPool, id: i64) -> Result<Option<Receipt>, sqlx::Error> {
    let Some(row) = sqlx::query_as::<_, (String, String, String)>(
        "SELECT store_name, total_price, date FROM receipts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, (String, String, String, Option<String>)>(
        "SELECT code, name, price, quantity FROM receipt_items WHERE receipt_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(code, name, price, quantity)| ReceiptItem { code, name, price, quantity })
    .collect();

    let receipt = Receipt::validate(UnvalidatedReceipt {
        store_name: row.0,
        total_price: parse_money(&row.1)?,
        date: ReceiptDate::lenient(&row.2),
        items,
    })
    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Some(receipt))
}

/// All receipts, newest first.
pub async fn list_receipts(pool: &DbPool) -> Result<Vec<ReceiptRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String, String, String, i64, String)>(
        r#"
        SELECT r.id, r.store_name, r.total_price, r.date,
               (SELECT COUNT(*) FROM receipt_items i WHERE i.receipt_id = r.id),
               r.created_at
        FROM receipts r
        ORDER BY r.id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(ReceiptRecord {
                id: r.0,
                store_name: r.1,
                total_price: parse_money(&r.2)?,
                date: ReceiptDate::lenient(&r.3),
                item_count: r.4,
                created_at: r.5,
            })
        })
        .collect()
}

fn parse_money(s: &str) -> Result<Money, sqlx::Error> {
    s.parse::<Money>().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn receipt(store: &str, total_minor: i64, items: Vec<ReceiptItem>) -> Receipt {
        Receipt::validate(UnvalidatedReceipt {
            store_name: store.to_string(),
            total_price: Money::from_minor_units(total_minor),
            date: ReceiptDate::Known(NaiveDate::from_ymd_opt(2024, 12, 7).unwrap()),
            items,
        })
        .unwrap()
    }

    async fn open() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("tally.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn save_and_load_preserves_items_in_order() {
        let (_dir, pool) = open().await;
        let saved = receipt(
            "いせやフーズクラブ",
            147_600,
            vec![
                ReceiptItem::new("123456", "牛乳", "396").with_quantity("X2点"),
                ReceiptItem::new("234567", "食パン", "1080"),
            ],
        );

        let id = save_receipt(&pool, &saved).await.unwrap();
        let loaded = get_receipt(&pool, id).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn unknown_date_survives_storage() {
        let (_dir, pool) = open().await;
        let saved = Receipt::validate(UnvalidatedReceipt {
            store_name: tally_core::UNKNOWN_STORE.to_string(),
            total_price: Money::zero(),
            date: ReceiptDate::Unknown,
            items: vec![],
        })
        .unwrap();

        let id = save_receipt(&pool, &saved).await.unwrap();
        let loaded = get_receipt(&pool, id).await.unwrap().unwrap();
        assert_eq!(loaded.date(), ReceiptDate::Unknown);
        assert!(loaded.total_price().is_zero());
    }

    #[tokio::test]
    async fn missing_receipt_is_none() {
        let (_dir, pool) = open().await;
        assert!(get_receipt(&pool, 42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_with_item_counts() {
        let (_dir, pool) = open().await;
        let first = save_receipt(&pool, &receipt("A", 100, vec![])).await.unwrap();
        let second = save_receipt(
            &pool,
            &receipt("B", 250, vec![ReceiptItem::new("123456", "牛乳", "250")]),
        )
        .await
        .unwrap();

        let list = list_receipts(&pool).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second);
        assert_eq!(list[0].store_name, "B");
        assert_eq!(list[0].item_count, 1);
        assert_eq!(list[0].total_price, Money::from_minor_units(250));
        assert_eq!(list[1].id, first);
        assert_eq!(list[1].item_count, 0);
    }

    #[tokio::test]
    async fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");

        let pool = create_db(&path).await.unwrap();
        let id = save_receipt(&pool, &receipt("A", 100, vec![])).await.unwrap();
        pool.close().await;

        let pool = create_db(&path).await.unwrap();
        assert_eq!(get_receipt(&pool, id).await.unwrap().unwrap().store_name(), "A");
    }
}
