use super::grid::NormalizedGrid;
use crate::llm::{Oracle, parse_json_object};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// `product name -> category`, scoped to a single import.
pub type CategoryMap = HashMap<String, String>;

/// Distinct, non-blank product names in file order.
pub fn collect_product_names(grid: &NormalizedGrid, name_column: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    grid.rows
        .iter()
        .filter_map(|row| row.cell(name_column).as_text())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

pub fn build_category_prompt(names: &[String], existing: &[String]) -> String {
    format!(
        "Assign a product category to each item of a second-hand resale inventory.\n\n\
         Products: {names}\n\
         Categories already in use: {existing}\n\n\
         Prefer one of the categories already in use whenever it fits; otherwise invent a short, \
         general category name. Reply with a single JSON object whose keys are exactly the product \
         names above and whose values are the category names. \
         Do not wrap the reply in markdown or code fences.",
        names = json!(names),
        existing = json!(existing),
    )
}

/// Asks the oracle for categories in chunks of `batch_size` names.
///
/// Best effort: a chunk whose call or reply fails contributes nothing and the
/// affected products later fall back to the default category.
pub async fn backfill_categories(
    oracle: &dyn Oracle,
    names: &[String],
    existing: &[String],
    batch_size: usize,
) -> CategoryMap {
    let mut assigned = CategoryMap::new();
    for chunk in names.chunks(batch_size.max(1)) {
        let prompt = build_category_prompt(chunk, existing);
        let reply = match oracle.generate(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(target = "resale.oracle", error = %err, products = chunk.len(), "category_backfill_failed");
                continue;
            }
        };
        match parse_json_object(&reply) {
            Ok(object) => {
                let before = assigned.len();
                merge_reply(chunk, &object, &mut assigned);
                debug!(
                    target = "resale.oracle",
                    requested = chunk.len(),
                    assigned = assigned.len() - before,
                    "category_backfill_chunk"
                );
            }
            Err(err) => {
                warn!(target = "resale.oracle", error = %err, products = chunk.len(), "category_backfill_unparseable");
            }
        }
    }
    assigned
}

fn merge_reply(
    requested: &[String],
    reply: &serde_json::Map<String, Value>,
    assigned: &mut CategoryMap,
) {
    let by_lower: HashMap<String, &String> = requested
        .iter()
        .map(|name| (name.to_lowercase(), name))
        .collect();
    for (key, value) in reply {
        let Some(category) = value.as_str().map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        let key = key.trim();
        let name = requested
            .iter()
            .find(|name| name.as_str() == key)
            .or_else(|| by_lower.get(&key.to_lowercase()).copied());
        if let Some(name) = name {
            assigned.insert(name.clone(), category.to_string());
        }
    }
}
