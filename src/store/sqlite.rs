use super::{ItemStore, StoreError};
use crate::models::{CategoryProfit, Item, ItemPatch, ItemStatus, NewItem, SellItem};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashSet;
use tracing::{debug, info};

const CREATE_ITEMS: &str = r"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    purchase_price REAL NOT NULL CHECK (purchase_price >= 0),
    sell_price REAL,
    sell_date TEXT,
    category TEXT NOT NULL CHECK (length(trim(category)) > 0),
    status TEXT NOT NULL DEFAULT 'listed' CHECK (status IN ('listed', 'sold'))
)";

const INSERT_ITEM: &str = r"
INSERT INTO items (name, purchase_price, sell_price, sell_date, category, status)
VALUES (?, ?, ?, ?, ?, ?)";

const SELECT_ITEM: &str = "SELECT id, name, purchase_price, sell_price, sell_date, category, status \
                           FROM items";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        // Every connection to an in-memory database is a separate database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(target = "resale.store", url = %url, "sqlite_store_ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_ITEMS).execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert(tx: &mut Transaction<'_, Sqlite>, item: &NewItem) -> Result<i64, StoreError> {
    let result = sqlx::query(INSERT_ITEM)
        .bind(&item.name)
        .bind(item.purchase_price)
        .bind(item.sell_price)
        .bind(&item.sell_date)
        .bind(&item.category)
        .bind(item.status.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn fetch_one(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
) -> Result<Option<Item>, StoreError> {
    let row = sqlx::query(&format!("{SELECT_ITEM} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(item_from_row).transpose()
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn fetch_distinct_categories(&self) -> Result<Vec<String>, StoreError> {
        let categories = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT category FROM items WHERE trim(category) <> '' ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn fetch_all_names(&self) -> Result<HashSet<String>, StoreError> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM items")
            .fetch_all(&self.pool)
            .await?;
        Ok(names.into_iter().collect())
    }

    async fn insert_batch(&self, items: &[NewItem]) -> Result<usize, StoreError> {
        // Dropping `tx` on an early return rolls the whole batch back.
        let mut tx = self.pool.begin().await?;
        for item in items {
            insert(&mut tx, item).await?;
        }
        tx.commit().await?;
        debug!(target = "resale.store", count = items.len(), "batch_committed");
        Ok(items.len())
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query(&format!("{SELECT_ITEM} ORDER BY id DESC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn create_item(&self, item: &NewItem) -> Result<Item, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = insert(&mut tx, item).await?;
        let created = fetch_one(&mut tx, id).await?;
        tx.commit().await?;
        created.ok_or_else(|| StoreError::Rejected(format!("item {id} vanished after insert")))
    }

    async fn get_item(&self, id: i64) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_ITEM} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn sell_item(&self, id: i64, sale: &SellItem) -> Result<Option<Item>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE items SET sell_price = ?, sell_date = ?, status = 'sold' WHERE id = ?",
        )
        .bind(sale.sell_price)
        .bind(sale.sell_date.format("%Y-%m-%d").to_string())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        let item = fetch_one(&mut tx, id).await?;
        tx.commit().await?;
        Ok(item)
    }

    async fn edit_item(&self, id: i64, patch: &ItemPatch) -> Result<Option<Item>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut item) = fetch_one(&mut tx, id).await? else {
            return Ok(None);
        };
        item.apply(patch);
        sqlx::query(
            "UPDATE items SET name = ?, purchase_price = ?, sell_price = ?, sell_date = ?, \
             category = ?, status = ? WHERE id = ?",
        )
        .bind(&item.name)
        .bind(item.purchase_price)
        .bind(item.sell_price)
        .bind(&item.sell_date)
        .bind(&item.category)
        .bind(item.status.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(item))
    }

    async fn delete_item(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn profit_by_category(&self) -> Result<Vec<CategoryProfit>, StoreError> {
        // TOTAL skips sold rows without a sell price and never yields NULL.
        let rows = sqlx::query(
            "SELECT category, TOTAL(sell_price - purchase_price) AS total_profit \
             FROM items WHERE status = 'sold' GROUP BY category ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<CategoryProfit, StoreError> {
                Ok(CategoryProfit {
                    category: row.try_get("category")?,
                    total_profit: row.try_get("total_profit")?,
                })
            })
            .collect()
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item, StoreError> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = ItemStatus::parse(&status).ok_or_else(|| StoreError::InvalidRow {
        id,
        reason: format!("unknown status `{status}`"),
    })?;
    Ok(Item {
        id,
        name: row.try_get("name")?,
        purchase_price: row.try_get("purchase_price")?,
        sell_price: row.try_get("sell_price")?,
        sell_date: row.try_get("sell_date")?,
        category: row.try_get("category")?,
        status,
    })
}
