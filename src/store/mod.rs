#[cfg(test)]
pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::models::{CategoryProfit, Item, ItemPatch, NewItem, SellItem};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("stored row {id} is invalid: {reason}")]
    InvalidRow { id: i64, reason: String },
}

/// The persistent item relation.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn fetch_distinct_categories(&self) -> Result<Vec<String>, StoreError>;

    async fn fetch_all_names(&self) -> Result<HashSet<String>, StoreError>;

    /// Writes every item or none of them.
    async fn insert_batch(&self, items: &[NewItem]) -> Result<usize, StoreError>;

    /// Newest first.
    async fn list_items(&self) -> Result<Vec<Item>, StoreError>;

    async fn create_item(&self, item: &NewItem) -> Result<Item, StoreError>;

    async fn get_item(&self, id: i64) -> Result<Option<Item>, StoreError>;

    /// Records a sale; the item becomes `sold`. `None` when the id is unknown.
    async fn sell_item(&self, id: i64, sale: &SellItem) -> Result<Option<Item>, StoreError>;

    async fn edit_item(&self, id: i64, patch: &ItemPatch) -> Result<Option<Item>, StoreError>;

    /// `false` when the id is unknown.
    async fn delete_item(&self, id: i64) -> Result<bool, StoreError>;

    /// Summed `sell_price - purchase_price` over sold items, per category.
    async fn profit_by_category(&self) -> Result<Vec<CategoryProfit>, StoreError>;
}
