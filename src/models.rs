use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Listed,
    Sold,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Listed => "listed",
            ItemStatus::Sold => "sold",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "listed" => Some(ItemStatus::Listed),
            "sold" => Some(ItemStatus::Sold),
            _ => None,
        }
    }

    /// An item counts as sold as soon as either sale field is known.
    pub fn derive(sell_price: Option<f64>, sell_date: Option<&str>) -> Self {
        if sell_price.is_some() || sell_date.is_some() {
            ItemStatus::Sold
        } else {
            ItemStatus::Listed
        }
    }
}

/// A fully reconciled record ready to be written.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewItem {
    pub name: String,
    pub purchase_price: f64,
    pub category: String,
    pub sell_price: Option<f64>,
    pub sell_date: Option<String>,
    pub status: ItemStatus,
}

impl NewItem {
    pub fn new(
        name: String,
        purchase_price: f64,
        category: String,
        sell_price: Option<f64>,
        sell_date: Option<String>,
    ) -> Self {
        Self {
            status: ItemStatus::derive(sell_price, sell_date.as_deref()),
            name,
            purchase_price,
            category,
            sell_price,
            sell_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub purchase_price: f64,
    pub sell_price: Option<f64>,
    pub sell_date: Option<String>,
    pub category: String,
    pub status: ItemStatus,
}

impl Item {
    /// Applies an edit and re-derives the status from the resulting sale fields.
    pub fn apply(&mut self, patch: &ItemPatch) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(price) = patch.purchase_price {
            self.purchase_price = price;
        }
        if let Some(category) = &patch.category {
            self.category = category.trim().to_string();
        }
        if let Some(price) = patch.sell_price {
            self.sell_price = Some(price);
        }
        if let Some(date) = patch.sell_date {
            self.sell_date = Some(date.format("%Y-%m-%d").to_string());
        }
        self.status = ItemStatus::derive(self.sell_price, self.sell_date.as_deref());
    }
}

/// Body of `POST /api/items`.
#[derive(Debug, Deserialize)]
pub struct CreateItem {
    pub name: String,
    pub purchase_price: f64,
    pub category: String,
}

impl CreateItem {
    pub fn into_new_item(self) -> Result<NewItem, String> {
        check_name(&self.name)?;
        check_price("purchase_price", self.purchase_price)?;
        check_category(&self.category)?;
        Ok(NewItem::new(
            self.name.trim().to_string(),
            self.purchase_price,
            self.category.trim().to_string(),
            None,
            None,
        ))
    }
}

/// Body of `PUT /api/items/{id}`: records a sale.
#[derive(Debug, Deserialize)]
pub struct SellItem {
    pub sell_price: f64,
    pub sell_date: NaiveDate,
}

impl SellItem {
    pub fn validate(&self) -> Result<(), String> {
        check_price("sell_price", self.sell_price)
    }
}

/// Body of `PATCH /api/items/{id}`; absent fields stay unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub purchase_price: Option<f64>,
    pub category: Option<String>,
    pub sell_price: Option<f64>,
    pub sell_date: Option<NaiveDate>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.purchase_price.is_none()
            && self.category.is_none()
            && self.sell_price.is_none()
            && self.sell_date.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("no fields to update".into());
        }
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(price) = self.purchase_price {
            check_price("purchase_price", price)?;
        }
        if let Some(category) = &self.category {
            check_category(category)?;
        }
        if let Some(price) = self.sell_price {
            check_price("sell_price", price)?;
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must not be blank".into());
    }
    Ok(())
}

fn check_category(category: &str) -> Result<(), String> {
    if category.trim().is_empty() {
        return Err("category must not be blank".into());
    }
    Ok(())
}

fn check_price(field: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{field} must be a non-negative number"));
    }
    Ok(())
}

/// Realised profit of sold items in one category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryProfit {
    pub category: String,
    pub total_profit: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    FileColumn,
    Oracle,
    #[default]
    Default,
}

/// Why a row did not make it into the batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingName,
    ExistingDuplicate,
    BatchDuplicate,
    InvalidPurchasePrice,
    InvalidSellPrice,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingName => "missing_name",
            SkipReason::ExistingDuplicate => "existing_duplicate",
            SkipReason::BatchDuplicate => "batch_duplicate",
            SkipReason::InvalidPurchasePrice => "invalid_purchase_price",
            SkipReason::InvalidSellPrice => "invalid_sell_price",
        }
    }
}

/// Per-import accounting of what happened to every normalized row.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ImportReport {
    pub rows_total: usize,
    pub rows_accepted: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub mapping: BTreeMap<String, Option<String>>,
    pub mapping_collisions: Vec<String>,
    pub category_source: CategorySource,
    pub categories_backfilled: usize,
}

impl ImportReport {
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImportResponse {
    pub import_id: String,
    pub message: String,
    pub inserted_count: usize,
    pub report: ImportReport,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub detail: Option<String>,
    pub missing: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_sale_fields() {
        let date = Some("2024-03-01");
        assert_eq!(ItemStatus::derive(None, None), ItemStatus::Listed);
        assert_eq!(ItemStatus::derive(Some(10.0), None), ItemStatus::Sold);
        assert_eq!(ItemStatus::derive(None, date), ItemStatus::Sold);
        assert_eq!(ItemStatus::derive(Some(0.0), date), ItemStatus::Sold);
    }

    #[test]
    fn status_parse_is_lenient_about_case_only() {
        assert_eq!(ItemStatus::parse(" Sold "), Some(ItemStatus::Sold));
        assert_eq!(ItemStatus::parse("listed"), Some(ItemStatus::Listed));
        assert_eq!(ItemStatus::parse("archived"), None);
    }

    fn stored() -> Item {
        Item {
            id: 7,
            name: "Jacket".into(),
            purchase_price: 12.0,
            sell_price: None,
            sell_date: None,
            category: "Outerwear".into(),
            status: ItemStatus::Listed,
        }
    }

    #[test]
    fn edits_rederive_status() {
        let mut item = stored();
        item.apply(&ItemPatch {
            name: Some("  Rain jacket ".into()),
            ..ItemPatch::default()
        });
        assert_eq!(item.name, "Rain jacket");
        assert_eq!(item.status, ItemStatus::Listed);

        item.apply(&ItemPatch {
            sell_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            ..ItemPatch::default()
        });
        assert_eq!(item.sell_date.as_deref(), Some("2024-05-01"));
        assert_eq!(item.status, ItemStatus::Sold);
    }

    #[test]
    fn patch_and_create_validation() {
        assert!(ItemPatch::default().validate().is_err());
        let patch = ItemPatch {
            purchase_price: Some(-1.0),
            ..ItemPatch::default()
        };
        assert!(patch.validate().is_err());
        let create = CreateItem {
            name: " ".into(),
            purchase_price: 1.0,
            category: "Home".into(),
        };
        assert!(create.into_new_item().is_err());
        let create = CreateItem {
            name: " Vase ".into(),
            purchase_price: 4.0,
            category: "Home".into(),
        };
        let item = create.into_new_item().expect("valid");
        assert_eq!(item.name, "Vase");
        assert_eq!(item.status, ItemStatus::Listed);
    }

    #[test]
    fn new_item_derives_status() {
        let item = NewItem::new("Jacket".into(), 12.0, "Outerwear".into(), Some(30.0), None);
        assert_eq!(item.status, ItemStatus::Sold);
        let item = NewItem::new("Jacket".into(), 12.0, "Outerwear".into(), None, None);
        assert_eq!(item.status, ItemStatus::Listed);
    }

    #[test]
    fn report_serializes_skip_reasons_in_snake_case() {
        let report = ImportReport {
            skipped: BTreeMap::from([
                (SkipReason::InvalidPurchasePrice, 2),
                (SkipReason::MissingName, 1),
            ]),
            ..ImportReport::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["skipped"]["invalid_purchase_price"], 2);
        assert_eq!(value["skipped"]["missing_name"], 1);
        assert_eq!(report.skipped_total(), 3);
    }
}
