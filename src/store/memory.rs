use super::{ItemStore, StoreError};
use crate::models::{CategoryProfit, Item, ItemPatch, ItemStatus, NewItem, SellItem};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::Mutex;

/// In-process store with the same all-or-nothing write contract as SQLite.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Vec<Item>>,
    next_id: Mutex<i64>,
    fail_on: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds rows as if a previous import had written them.
    pub async fn seed(&self, items: &[NewItem]) {
        self.insert_batch(items).await.ok();
    }

    /// Makes any batch containing `name` fail.
    pub async fn fail_on(&self, name: &str) {
        *self.fail_on.lock().await = Some(name.to_string());
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn fetch_distinct_categories(&self) -> Result<Vec<String>, StoreError> {
        let items = self.items.lock().await;
        let categories: BTreeSet<String> = items.iter().map(|i| i.category.clone()).collect();
        Ok(categories.into_iter().collect())
    }

    async fn fetch_all_names(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.items.lock().await.iter().map(|i| i.name.clone()).collect())
    }

    async fn insert_batch(&self, items: &[NewItem]) -> Result<usize, StoreError> {
        if let Some(poison) = self.fail_on.lock().await.as_deref()
            && items.iter().any(|item| item.name == poison)
        {
            return Err(StoreError::Rejected(format!("constraint violated by `{poison}`")));
        }
        let mut stored = self.items.lock().await;
        let mut next_id = self.next_id.lock().await;
        for item in items {
            *next_id += 1;
            stored.push(stored_item(*next_id, item));
        }
        Ok(items.len())
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let mut items = self.items.lock().await.clone();
        items.reverse();
        Ok(items)
    }

    async fn create_item(&self, item: &NewItem) -> Result<Item, StoreError> {
        self.insert_batch(std::slice::from_ref(item)).await?;
        let id = *self.next_id.lock().await;
        self.get_item(id)
            .await?
            .ok_or_else(|| StoreError::Rejected(format!("item {id} vanished after insert")))
    }

    async fn get_item(&self, id: i64) -> Result<Option<Item>, StoreError> {
        Ok(self.items.lock().await.iter().find(|i| i.id == id).cloned())
    }

    async fn sell_item(&self, id: i64, sale: &SellItem) -> Result<Option<Item>, StoreError> {
        let mut items = self.items.lock().await;
        let Some(item) = items.iter_mut().find(|i| i.id == id) else {
            return Ok(None);
        };
        item.sell_price = Some(sale.sell_price);
        item.sell_date = Some(sale.sell_date.format("%Y-%m-%d").to_string());
        item.status = ItemStatus::Sold;
        Ok(Some(item.clone()))
    }

    async fn edit_item(&self, id: i64, patch: &ItemPatch) -> Result<Option<Item>, StoreError> {
        let mut items = self.items.lock().await;
        let Some(item) = items.iter_mut().find(|i| i.id == id) else {
            return Ok(None);
        };
        item.apply(patch);
        Ok(Some(item.clone()))
    }

    async fn delete_item(&self, id: i64) -> Result<bool, StoreError> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|i| i.id != id);
        Ok(items.len() < before)
    }

    async fn profit_by_category(&self) -> Result<Vec<CategoryProfit>, StoreError> {
        let items = self.items.lock().await;
        let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
        for item in items.iter().filter(|i| i.status == ItemStatus::Sold) {
            let profit = item.sell_price.map_or(0.0, |sold| sold - item.purchase_price);
            *totals.entry(item.category.as_str()).or_default() += profit;
        }
        Ok(totals
            .into_iter()
            .map(|(category, total_profit)| CategoryProfit {
                category: category.to_string(),
                total_profit,
            })
            .collect())
    }
}

fn stored_item(id: i64, item: &NewItem) -> Item {
    Item {
        id,
        name: item.name.clone(),
        purchase_price: item.purchase_price,
        sell_price: item.sell_price,
        sell_date: item.sell_date.clone(),
        category: item.category.clone(),
        status: item.status,
    }
}
