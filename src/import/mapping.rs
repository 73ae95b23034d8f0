use super::grid::Cell;
use crate::llm::{Oracle, OracleError, ReplyError, parse_json_object};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetColumn {
    Name,
    PurchasePrice,
    Category,
    SellPrice,
    SellDate,
}

impl TargetColumn {
    pub const ALL: [TargetColumn; 5] = [
        TargetColumn::Name,
        TargetColumn::PurchasePrice,
        TargetColumn::Category,
        TargetColumn::SellPrice,
        TargetColumn::SellDate,
    ];

    pub const REQUIRED: [TargetColumn; 2] = [TargetColumn::Name, TargetColumn::PurchasePrice];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetColumn::Name => "name",
            TargetColumn::PurchasePrice => "purchase_price",
            TargetColumn::Category => "category",
            TargetColumn::SellPrice => "sell_price",
            TargetColumn::SellDate => "sell_date",
        }
    }

    /// Lenient on case and separators: `Purchase Price` and `purchase-price`
    /// both resolve to [`TargetColumn::PurchasePrice`].
    pub fn parse_lenient(input: &str) -> Option<Self> {
        let normalized = input
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_");
        TargetColumn::ALL
            .into_iter()
            .find(|column| column.as_str() == normalized)
    }

    fn describe(&self) -> &'static str {
        match self {
            TargetColumn::Name => "product name or title (required)",
            TargetColumn::PurchasePrice => "price paid when buying the item (required)",
            TargetColumn::Category => "product category or type",
            TargetColumn::SellPrice => "price the item was sold for",
            TargetColumn::SellDate => "date the item was sold",
        }
    }
}

impl fmt::Display for TargetColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("oracle call failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("unusable oracle reply: {0}")]
    Reply(#[from] ReplyError),
}

/// `file header -> target column`, kept in file header order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnMapping {
    pub assignments: Vec<(String, Option<TargetColumn>)>,
}

impl ColumnMapping {
    /// Builds the reverse lookup. When several headers claim the same target
    /// the right-most header is kept and the collision is recorded.
    pub fn invert(&self) -> InvertedMapping {
        let mut columns: HashMap<TargetColumn, String> = HashMap::new();
        let mut collisions = Vec::new();
        for (header, target) in &self.assignments {
            let Some(target) = target else { continue };
            if let Some(previous) = columns.insert(*target, header.clone()) {
                collisions.push(format!("{target}: `{previous}` replaced by `{header}`"));
            }
        }
        InvertedMapping {
            columns,
            collisions,
        }
    }

    pub fn summary(&self) -> BTreeMap<String, Option<String>> {
        self.assignments
            .iter()
            .map(|(header, target)| (header.clone(), target.map(|t| t.as_str().to_string())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvertedMapping {
    columns: HashMap<TargetColumn, String>,
    collisions: Vec<String>,
}

impl InvertedMapping {
    pub fn header(&self, column: TargetColumn) -> Option<&str> {
        self.columns.get(&column).map(String::as_str)
    }

    pub fn contains(&self, column: TargetColumn) -> bool {
        self.columns.contains_key(&column)
    }

    pub fn missing_required(&self) -> Vec<TargetColumn> {
        TargetColumn::REQUIRED
            .into_iter()
            .filter(|column| !self.contains(*column))
            .collect()
    }

    pub fn collisions(&self) -> &[String] {
        &self.collisions
    }
}

pub fn build_mapping_prompt(headers: &[String], sample: &[Vec<Cell>]) -> String {
    let schema = TargetColumn::ALL
        .iter()
        .map(|column| format!("- {}: {}", column.as_str(), column.describe()))
        .collect::<Vec<_>>()
        .join("\n");
    let targets = TargetColumn::ALL.map(|column| column.as_str());

    format!(
        "Map the columns of a spreadsheet export onto a resale inventory schema.\n\n\
         Target columns:\n{schema}\n\n\
         File headers: {headers}\n\
         First rows of data (values in header order): {sample}\n\n\
         Reply with a single JSON object. Its keys must be exactly the file headers above. \
         Each value must be one of {targets} or null when the header matches none of them. \
         Use each target column at most once. \
         Do not wrap the reply in markdown or code fences.",
        headers = json!(headers),
        sample = json!(sample),
        targets = json!(targets),
    )
}

/// Reads the oracle's object into a mapping over the known headers.
///
/// Keys are matched exactly, then case-insensitively; keys that match no
/// header are ignored, as are values that are not a known target column.
pub fn parse_mapping(headers: &[String], reply: &serde_json::Map<String, Value>) -> ColumnMapping {
    let mut resolved: HashMap<&str, Option<TargetColumn>> = HashMap::new();
    for (key, value) in reply {
        let Some(header) = headers
            .iter()
            .find(|h| *h == key)
            .or_else(|| headers.iter().find(|h| h.trim().eq_ignore_ascii_case(key.trim())))
        else {
            warn!(target = "resale.oracle", key = %key, "mapping_unknown_header");
            continue;
        };
        let target = match value {
            Value::Null => None,
            Value::String(raw) if raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case("null") => {
                None
            }
            Value::String(raw) => {
                let target = TargetColumn::parse_lenient(raw);
                if target.is_none() {
                    warn!(target = "resale.oracle", header = %header, value = %raw, "mapping_unknown_target");
                }
                target
            }
            other => {
                warn!(target = "resale.oracle", header = %header, value = %other, "mapping_non_string_target");
                None
            }
        };
        resolved.insert(header.as_str(), target);
    }

    ColumnMapping {
        assignments: headers
            .iter()
            .map(|header| {
                (
                    header.clone(),
                    resolved.get(header.as_str()).copied().flatten(),
                )
            })
            .collect(),
    }
}

pub async fn infer_mapping(
    oracle: &dyn Oracle,
    headers: &[String],
    sample: &[Vec<Cell>],
) -> Result<ColumnMapping, MappingError> {
    let prompt = build_mapping_prompt(headers, sample);
    let reply = oracle.generate(&prompt).await?;
    let object = parse_json_object(&reply)?;
    Ok(parse_mapping(headers, &object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedOracle;

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn target_names_are_lenient() {
        assert_eq!(TargetColumn::parse_lenient("purchase_price"), Some(TargetColumn::PurchasePrice));
        assert_eq!(TargetColumn::parse_lenient(" Purchase Price "), Some(TargetColumn::PurchasePrice));
        assert_eq!(TargetColumn::parse_lenient("sell-date"), Some(TargetColumn::SellDate));
        assert_eq!(TargetColumn::parse_lenient("profit"), None);
    }

    #[test]
    fn prompt_embeds_schema_headers_and_sample() {
        let prompt = build_mapping_prompt(
            &headers(&["Product", "Buy Price"]),
            &[vec![Cell::text("Shoes"), Cell::text("25.5")]],
        );
        for column in TargetColumn::ALL {
            assert!(prompt.contains(column.as_str()));
        }
        assert!(prompt.contains(r#"["Product","Buy Price"]"#));
        assert!(prompt.contains(r#"[["Shoes","25.5"]]"#));
        assert!(prompt.contains("code fences"));
    }

    #[test]
    fn parse_keeps_header_order_and_ignores_unknowns() {
        let reply = serde_json::from_str::<serde_json::Map<String, Value>>(
            r#"{"Type": "category", "product": "Name", "Ghost": "sell_price",
                "Buy Price": "purchase_price", "Notes": null, "Extra": 3}"#,
        )
        .unwrap();
        let mapping = parse_mapping(&headers(&["Product", "Buy Price", "Type", "Notes"]), &reply);
        assert_eq!(
            mapping.assignments,
            vec![
                ("Product".to_string(), Some(TargetColumn::Name)),
                ("Buy Price".to_string(), Some(TargetColumn::PurchasePrice)),
                ("Type".to_string(), Some(TargetColumn::Category)),
                ("Notes".to_string(), None),
            ]
        );
    }

    #[test]
    fn inversion_keeps_last_header_and_records_collision() {
        let mapping = ColumnMapping {
            assignments: vec![
                ("Cost".into(), Some(TargetColumn::PurchasePrice)),
                ("Title".into(), Some(TargetColumn::Name)),
                ("Paid".into(), Some(TargetColumn::PurchasePrice)),
            ],
        };
        let inverted = mapping.invert();
        assert_eq!(inverted.header(TargetColumn::PurchasePrice), Some("Paid"));
        assert_eq!(inverted.collisions().len(), 1);
        assert!(inverted.collisions()[0].contains("purchase_price"));
        assert!(inverted.missing_required().is_empty());
    }

    #[test]
    fn missing_required_lists_exactly_what_is_absent() {
        let mapping = ColumnMapping {
            assignments: vec![("Title".into(), Some(TargetColumn::Name))],
        };
        assert_eq!(mapping.invert().missing_required(), vec![TargetColumn::PurchasePrice]);
        assert_eq!(
            ColumnMapping::default().invert().missing_required(),
            vec![TargetColumn::Name, TargetColumn::PurchasePrice]
        );
    }

    #[tokio::test]
    async fn infer_accepts_fenced_reply() {
        let oracle = ScriptedOracle::new()
            .reply("```json\n{\"Product\": \"name\", \"Buy Price\": \"purchase_price\"}\n```");
        let mapping = infer_mapping(&oracle, &headers(&["Product", "Buy Price"]), &[])
            .await
            .expect("mapping");
        let inverted = mapping.invert();
        assert_eq!(inverted.header(TargetColumn::Name), Some("Product"));
        assert_eq!(oracle.calls().await, 1);
    }

    #[tokio::test]
    async fn infer_surfaces_oracle_and_reply_failures() {
        let oracle = ScriptedOracle::new().fail(OracleError::Http("HTTP 429".into()));
        let err = infer_mapping(&oracle, &headers(&["A"]), &[]).await.unwrap_err();
        assert!(matches!(err, MappingError::Oracle(_)));

        let oracle = ScriptedOracle::new().reply("I could not decide.");
        let err = infer_mapping(&oracle, &headers(&["A"]), &[]).await.unwrap_err();
        assert!(matches!(err, MappingError::Reply(ReplyError::Malformed(_))));

        let oracle = ScriptedOracle::new().reply("");
        let err = infer_mapping(&oracle, &headers(&["A"]), &[]).await.unwrap_err();
        assert!(matches!(err, MappingError::Reply(ReplyError::Empty)));
    }
}
