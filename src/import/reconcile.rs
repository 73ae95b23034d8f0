use super::categorize::CategoryMap;
use super::grid::{NormalizedGrid, Row};
use super::mapping::{InvertedMapping, TargetColumn};
use crate::models::{NewItem, SkipReason};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

pub struct ReconcileContext<'a> {
    pub mapping: &'a InvertedMapping,
    pub categories: &'a CategoryMap,
    pub existing_names: &'a HashSet<String>,
    pub default_category: &'a str,
}

#[derive(Debug, Default)]
pub struct Reconciliation {
    pub items: Vec<NewItem>,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub categories_backfilled: usize,
}

impl Reconciliation {
    fn skip(&mut self, row: &Row, reason: SkipReason, detail: &str) {
        debug!(
            target = "resale.import",
            line = row.line,
            reason = reason.as_str(),
            detail = detail,
            "row_skipped"
        );
        *self.skipped.entry(reason).or_insert(0) += 1;
    }
}

struct Columns {
    name: Option<usize>,
    purchase_price: Option<usize>,
    category: Option<usize>,
    sell_price: Option<usize>,
    sell_date: Option<usize>,
}

impl Columns {
    fn resolve(grid: &NormalizedGrid, mapping: &InvertedMapping) -> Self {
        let index = |column| {
            mapping
                .header(column)
                .and_then(|header| grid.column_index(header))
        };
        Self {
            name: index(TargetColumn::Name),
            purchase_price: index(TargetColumn::PurchasePrice),
            category: index(TargetColumn::Category),
            sell_price: index(TargetColumn::SellPrice),
            sell_date: index(TargetColumn::SellDate),
        }
    }
}

/// Turns normalized rows into insertable items, in file order.
///
/// The first accepted occurrence of a name wins; names already in the store
/// are never re-inserted. Rows with unusable values are skipped and counted,
/// they never fail the batch.
pub fn reconcile_rows(grid: &NormalizedGrid, ctx: &ReconcileContext<'_>) -> Reconciliation {
    let columns = Columns::resolve(grid, ctx.mapping);
    let mut out = Reconciliation::default();
    let mut accepted: HashSet<String> = HashSet::new();

    for row in &grid.rows {
        let Some(name) = columns.name.and_then(|idx| row.cell(idx).as_text()) else {
            out.skip(row, SkipReason::MissingName, "");
            continue;
        };

        if ctx.existing_names.contains(&name) {
            out.skip(row, SkipReason::ExistingDuplicate, &name);
            continue;
        }
        if accepted.contains(&name) {
            out.skip(row, SkipReason::BatchDuplicate, &name);
            continue;
        }

        let purchase_price = match columns
            .purchase_price
            .map(|idx| row.cell(idx).as_number())
            .transpose()
        {
            Ok(value) => value.flatten().unwrap_or(0.0),
            Err(err) => {
                out.skip(row, SkipReason::InvalidPurchasePrice, &err.to_string());
                continue;
            }
        };
        if purchase_price < 0.0 {
            out.skip(row, SkipReason::InvalidPurchasePrice, "negative");
            continue;
        }

        let file_category = columns.category.and_then(|idx| row.cell(idx).as_text());
        let oracle_category = ctx.categories.get(&name).filter(|_| file_category.is_none());
        let from_oracle = oracle_category.is_some();
        let category = file_category
            .or_else(|| oracle_category.cloned())
            .unwrap_or_else(|| ctx.default_category.to_string());

        let sell_price = match columns
            .sell_price
            .map(|idx| row.cell(idx).as_number())
            .transpose()
        {
            Ok(value) => value.flatten(),
            Err(err) => {
                out.skip(row, SkipReason::InvalidSellPrice, &err.to_string());
                continue;
            }
        };
        if sell_price.is_some_and(|price| price < 0.0) {
            out.skip(row, SkipReason::InvalidSellPrice, "negative");
            continue;
        }

        let sell_date = columns
            .sell_date
            .and_then(|idx| row.cell(idx).as_sale_date());

        accepted.insert(name.clone());
        if from_oracle {
            out.categories_backfilled += 1;
        }
        out.items.push(NewItem::new(
            name,
            purchase_price,
            category,
            sell_price,
            sell_date,
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::grid::{Cell, RawGrid, normalize};
    use crate::import::mapping::ColumnMapping;
    use crate::models::ItemStatus;
    
    fn grid(headers: &[&str], rows: Vec<Vec<&str>>) -> NormalizedGrid {
        normalize(RawGrid {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|v| if v.is_empty() { Cell::Empty } else { Cell::text(v) })
                        .collect()
                })
                .collect(),
        })
        .expect("grid")
    }

    fn mapping(pairs: &[(&str, TargetColumn)]) -> InvertedMapping {
        ColumnMapping {
            assignments: pairs
                .iter()
                .map(|(h, t)| (h.to_string(), Some(*t)))
                .collect(),
        }
        .invert()
    }

    fn run(
        grid: &NormalizedGrid,
        mapping: &InvertedMapping,
        categories: &CategoryMap,
        existing: &HashSet<String>,
    ) -> Reconciliation {
        reconcile_rows(
            grid,
            &ReconcileContext {
                mapping,
                categories,
                existing_names: existing,
                default_category: "Inne",
            },
        )
    }

    #[test]
    fn first_occurrence_wins_within_a_batch() {
        let g = grid(
            &["Product", "Buy Price", "Type"],
            vec![
                vec!["Shoes", "25.5", "Footwear"],
                vec!["Shoes", "30", "Footwear"],
            ],
        );
        let m = mapping(&[
            ("Product", TargetColumn::Name),
            ("Buy Price", TargetColumn::PurchasePrice),
            ("Type", TargetColumn::Category),
        ]);
        let out = run(&g, &m, &CategoryMap::new(), &HashSet::new());
        assert_eq!(
            out.items,
            vec![NewItem::new("Shoes".into(), 25.5, "Footwear".into(), None, None)]
        );
        assert_eq!(out.items[0].status, ItemStatus::Listed);
        assert_eq!(out.skipped.get(&SkipReason::BatchDuplicate), Some(&1));
    }

    #[test]
    fn existing_names_are_skipped() {
        let g = grid(&["n", "p"], vec![vec!["Hat", "1"], vec!["Scarf", "2"]]);
        let m = mapping(&[("n", TargetColumn::Name), ("p", TargetColumn::PurchasePrice)]);
        let existing = HashSet::from(["Hat".to_string()]);
        let out = run(&g, &m, &CategoryMap::new(), &existing);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].name, "Scarf");
        assert_eq!(out.skipped.get(&SkipReason::ExistingDuplicate), Some(&1));
    }

    #[test]
    fn malformed_price_drops_row_but_blank_price_defaults_to_zero() {
        let g = grid(
            &["n", "p"],
            vec![vec!["Broken", "N/A"], vec!["Free", ""], vec!["Neg", "-3"]],
        );
        let m = mapping(&[("n", TargetColumn::Name), ("p", TargetColumn::PurchasePrice)]);
        let out = run(&g, &m, &CategoryMap::new(), &HashSet::new());
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].name, "Free");
        assert_eq!(out.items[0].purchase_price, 0.0);
        assert_eq!(out.skipped.get(&SkipReason::InvalidPurchasePrice), Some(&2));
    }

    #[test]
    fn rejected_row_does_not_claim_its_name() {
        let g = grid(&["n", "p"], vec![vec!["Coat", "oops"], vec!["Coat", "12"]]);
        let m = mapping(&[("n", TargetColumn::Name), ("p", TargetColumn::PurchasePrice)]);
        let out = run(&g, &m, &CategoryMap::new(), &HashSet::new());
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].purchase_price, 12.0);
    }

    #[test]
    fn missing_names_are_skipped() {
        let g = grid(&["n", "p"], vec![vec!["", "4"], vec!["  ", "5"], vec!["Bag", "6"]]);
        let m = mapping(&[("n", TargetColumn::Name), ("p", TargetColumn::PurchasePrice)]);
        let out = run(&g, &m, &CategoryMap::new(), &HashSet::new());
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.skipped.get(&SkipReason::MissingName), Some(&2));
    }

    #[test]
    fn category_prefers_file_then_oracle_then_default() {
        let g = grid(
            &["n", "p", "c"],
            vec![
                vec!["Boots", "1", "Footwear"],
                vec!["Lamp", "2", ""],
                vec!["Vase", "3", " "],
            ],
        );
        let m = mapping(&[
            ("n", TargetColumn::Name),
            ("p", TargetColumn::PurchasePrice),
            ("c", TargetColumn::Category),
        ]);
        let categories = CategoryMap::from([
            ("Boots".to_string(), "Shoes".to_string()),
            ("Lamp".to_string(), "Home".to_string()),
        ]);
        let out = run(&g, &m, &categories, &HashSet::new());
        let resolved: Vec<&str> = out.items.iter().map(|i| i.category.as_str()).collect();
        assert_eq!(resolved, vec!["Footwear", "Home", "Inne"]);
        assert_eq!(out.categories_backfilled, 1);
    }

    #[test]
    fn sale_fields_drive_status() {
        let g = grid(
            &["n", "p", "sp", "sd"],
            vec![
                vec!["A", "1", "10", ""],
                vec!["B", "1", "", "2024-02-01"],
                vec!["C", "1", "", ""],
                vec!["D", "1", "free", ""],
                vec!["E", "1", "", "someday"],
            ],
        );
        let m = mapping(&[
            ("n", TargetColumn::Name),
            ("p", TargetColumn::PurchasePrice),
            ("sp", TargetColumn::SellPrice),
            ("sd", TargetColumn::SellDate),
        ]);
        let out = run(&g, &m, &CategoryMap::new(), &HashSet::new());
        let statuses: Vec<(&str, ItemStatus)> = out
            .items
            .iter()
            .map(|i| (i.name.as_str(), i.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("A", ItemStatus::Sold),
                ("B", ItemStatus::Sold),
                ("C", ItemStatus::Listed),
                ("E", ItemStatus::Sold),
            ]
        );
        assert_eq!(out.items[1].sell_date.as_deref(), Some("2024-02-01"));
        assert_eq!(out.items[3].sell_date.as_deref(), Some("someday"));
        assert_eq!(out.skipped.get(&SkipReason::InvalidSellPrice), Some(&1));
    }

    #[test]
    fn loosely_written_sale_date_keeps_the_row() {
        let g = grid(
            &["n", "p", "sd"],
            vec![vec!["Coat", "20", "01.05.2023"], vec!["Lamp", "5", "March 2024"]],
        );
        let m = mapping(&[
            ("n", TargetColumn::Name),
            ("p", TargetColumn::PurchasePrice),
            ("sd", TargetColumn::SellDate),
        ]);
        let out = run(&g, &m, &CategoryMap::new(), &HashSet::new());
        assert!(out.skipped.is_empty());
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[0].sell_date.as_deref(), Some("2023-05-01"));
        let lamp = &out.items[1];
        assert_eq!(lamp.name, "Lamp");
        assert_eq!(lamp.sell_date.as_deref(), Some("March 2024"));
        assert_eq!(lamp.status, ItemStatus::Sold);
    }

    #[test]
    fn thousands_separated_price_is_skipped_not_misread() {
        let g = grid(&["n", "p"], vec![vec!["Coat", "1,250"], vec!["Sofa", "1.250,00"]]);
        let m = mapping(&[("n", TargetColumn::Name), ("p", TargetColumn::PurchasePrice)]);
        let out = run(&g, &m, &CategoryMap::new(), &HashSet::new());
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].name, "Sofa");
        assert_eq!(out.items[0].purchase_price, 1250.0);
        assert_eq!(out.skipped.get(&SkipReason::InvalidPurchasePrice), Some(&1));
    }

    #[test]
    fn backfilled_count_ignores_rows_skipped_later() {
        let g = grid(
            &["n", "p", "sp"],
            vec![vec!["Lamp", "2", "n/a"], vec!["Vase", "3", ""]],
        );
        let m = mapping(&[
            ("n", TargetColumn::Name),
            ("p", TargetColumn::PurchasePrice),
            ("sp", TargetColumn::SellPrice),
        ]);
        let categories = CategoryMap::from([
            ("Lamp".to_string(), "Home".to_string()),
            ("Vase".to_string(), "Home".to_string()),
        ]);
        let out = run(&g, &m, &categories, &HashSet::new());
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.skipped.get(&SkipReason::InvalidSellPrice), Some(&1));
        assert_eq!(out.categories_backfilled, 1);
    }

    #[test]
    fn every_item_satisfies_the_status_invariant() {
        let g = grid(
            &["n", "p", "sp", "sd"],
            vec![
                vec!["A", "", "", ""],
                vec!["B", "2", "0", ""],
                vec!["C", "3", "", "01.05.2023"],
                vec!["D", "4", "9.99", "2023-05-02"],
            ],
        );
        let m = mapping(&[
            ("n", TargetColumn::Name),
            ("p", TargetColumn::PurchasePrice),
            ("sp", TargetColumn::SellPrice),
            ("sd", TargetColumn::SellDate),
        ]);
        let out = run(&g, &m, &CategoryMap::new(), &HashSet::new());
        assert_eq!(out.items.len(), 4);
        for item in &out.items {
            let sold = item.sell_price.is_some() || item.sell_date.is_some();
            assert_eq!(item.status == ItemStatus::Sold, sold, "{}", item.name);
            assert!(!item.category.is_empty());
        }
    }
}
