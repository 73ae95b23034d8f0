pub mod categorize;
pub mod decode;
pub mod grid;
pub mod mapping;
pub mod reconcile;

use crate::config::ImportConfig;
use crate::llm::Oracle;
use crate::models::{CategorySource, ImportReport, ImportResponse, NewItem, StageReport};
use crate::store::ItemStore;
use decode::FileFormat;
use grid::{NormalizedGrid, RawGrid};
use mapping::{ColumnMapping, InvertedMapping, TargetColumn};
use serde_json::{Value, json};
use std::{collections::HashSet, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// The import-reconciliation pipeline. Holds no per-import state; each call
/// to [`ImportPipeline::run`] works on its own local accumulators.
#[derive(Clone)]
pub struct ImportPipeline {
    oracle: Arc<dyn Oracle>,
    store: Arc<dyn ItemStore>,
    config: Arc<ImportConfig>,
}

impl ImportPipeline {
    pub fn new(oracle: Arc<dyn Oracle>, store: Arc<dyn ItemStore>, config: ImportConfig) -> Self {
        Self {
            oracle,
            store,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    /// Decodes an uploaded `.csv`/`.xlsx` file and imports it.
    pub async fn run_file(&self, filename: &str, bytes: &[u8]) -> Result<ImportResponse, ImportError> {
        let Some(format) = FileFormat::from_filename(filename) else {
            return Err(ImportError::unsupported_format(filename));
        };
        let started = Instant::now();
        let raw = decode::decode(bytes, format)
            .map_err(|err| ImportError::decode(err.to_string()))?;
        let decode_report = StageReport::new(
            "decode_file",
            started.elapsed().as_millis(),
            json!({
                "filename": filename,
                "bytes": bytes.len(),
                "headers": raw.headers.len(),
                "rows": raw.rows.len(),
            }),
        );
        let mut response = self.run(raw).await?;
        response.stages.insert(0, decode_report);
        Ok(response)
    }

    pub async fn run(&self, raw: RawGrid) -> Result<ImportResponse, ImportError> {
        let import_id = Uuid::new_v4();
        let mut stages = Vec::new();
        let mut report = ImportReport::default();

        let grid = self
            .capture_stage("normalize_grid", &mut stages, async move {
                stages::normalize_grid(raw).await
            })
            .await?;
        report.rows_total = grid.rows.len();

        let sample = grid.sample(self.config.sample_rows);
        let mapping = self
            .capture_stage(
                "infer_mapping",
                &mut stages,
                stages::infer_mapping(self.oracle.as_ref(), &grid.headers, &sample),
            )
            .await?;
        let inverted = mapping.invert();
        report.mapping = mapping.summary();
        report.mapping_collisions = inverted.collisions().to_vec();
        for collision in inverted.collisions() {
            warn!(target = "resale.import", %import_id, collision = %collision, "mapping_collision");
        }
        stages::require_columns(&inverted)?;

        let categories = if inverted.contains(TargetColumn::Category) {
            report.category_source = CategorySource::FileColumn;
            Default::default()
        } else {
            let assigned = self
                .capture_stage(
                    "backfill_categories",
                    &mut stages,
                    stages::backfill_categories(
                        self.oracle.as_ref(),
                        self.store.as_ref(),
                        &grid,
                        &inverted,
                        self.config.category_batch_size,
                    ),
                )
                .await?;
            if !assigned.is_empty() {
                report.category_source = CategorySource::Oracle;
            }
            assigned
        };

        let existing_names = self
            .capture_stage(
                "fetch_existing",
                &mut stages,
                stages::fetch_existing(self.store.as_ref()),
            )
            .await?;

        let reconciliation = self
            .capture_stage("reconcile_rows", &mut stages, async {
                stages::reconcile_rows(
                    &grid,
                    &reconcile::ReconcileContext {
                        mapping: &inverted,
                        categories: &categories,
                        existing_names: &existing_names,
                        default_category: &self.config.default_category,
                    },
                )
            })
            .await?;
        for (reason, count) in &reconciliation.skipped {
            crate::metrics::rows_skipped(reason.as_str(), *count);
        }
        report.skipped = reconciliation.skipped;
        report.categories_backfilled = reconciliation.categories_backfilled;
        report.rows_accepted = reconciliation.items.len();

        let inserted = self
            .capture_stage(
                "write_batch",
                &mut stages,
                stages::write_batch(self.store.as_ref(), &reconciliation.items),
            )
            .await?;

        info!(
            target = "resale.import",
            %import_id,
            rows = report.rows_total,
            inserted,
            skipped = report.skipped_total(),
            "import_completed"
        );

        Ok(ImportResponse {
            import_id: import_id.to_string(),
            message: format!("Successfully imported {inserted} items."),
            inserted_count: inserted,
            report,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, ImportError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, ImportError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct ImportError {
    stage: &'static str,
    message: String,
    kind: ImportErrorKind,
    missing: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportErrorKind {
    InvalidUpload,
    UnsupportedFormat,
    Decode,
    EmptyInput,
    MappingOracle,
    RequiredColumnsMissing,
    NoValidRows,
    Storage,
    Busy,
}

impl ImportErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ImportErrorKind::InvalidUpload => "invalid_upload",
            ImportErrorKind::UnsupportedFormat => "unsupported_format",
            ImportErrorKind::Decode => "decode_failed",
            ImportErrorKind::EmptyInput => "empty_input",
            ImportErrorKind::MappingOracle => "mapping_oracle_failed",
            ImportErrorKind::RequiredColumnsMissing => "required_columns_missing",
            ImportErrorKind::NoValidRows => "no_valid_rows",
            ImportErrorKind::Storage => "storage_failed",
            ImportErrorKind::Busy => "import_in_progress",
        }
    }
}

impl ImportError {
    fn new(stage: &'static str, kind: ImportErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
            missing: Vec::new(),
        }
    }

    pub fn invalid_upload(message: impl Into<String>) -> Self {
        Self::new("upload", ImportErrorKind::InvalidUpload, message)
    }

    pub fn unsupported_format(filename: &str) -> Self {
        Self::new(
            "decode_file",
            ImportErrorKind::UnsupportedFormat,
            format!("unsupported file format `{filename}`; upload a .csv or .xlsx file"),
        )
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new("decode_file", ImportErrorKind::Decode, message)
    }

    pub fn empty_input(message: impl Into<String>) -> Self {
        Self::new("normalize_grid", ImportErrorKind::EmptyInput, message)
    }

    pub fn mapping_oracle(message: impl Into<String>) -> Self {
        Self::new("infer_mapping", ImportErrorKind::MappingOracle, message)
    }

    pub fn required_columns_missing(missing: &[TargetColumn]) -> Self {
        let names = missing
            .iter()
            .map(|column| column.as_str().to_string())
            .collect::<Vec<_>>();
        Self {
            stage: "infer_mapping",
            message: format!("could not resolve required columns: {}", names.join(", ")),
            kind: ImportErrorKind::RequiredColumnsMissing,
            missing: names,
        }
    }

    pub fn no_valid_rows(message: impl Into<String>) -> Self {
        Self::new("reconcile_rows", ImportErrorKind::NoValidRows, message)
    }

    pub fn storage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, ImportErrorKind::Storage, message)
    }

    pub fn busy() -> Self {
        Self::new(
            "admission",
            ImportErrorKind::Busy,
            "another import is running against this store",
        )
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> ImportErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;
    use super::categorize::CategoryMap;
    use super::grid::GridError;
    use super::reconcile::{ReconcileContext, Reconciliation};

    pub async fn normalize_grid(raw: RawGrid) -> Result<StageOutcome<NormalizedGrid>, ImportError> {
        let raw_rows = raw.rows.len();
        let grid = grid::normalize(raw).map_err(|err| match err {
            GridError::NoHeaders => ImportError::empty_input("the file has no header row"),
            GridError::NoRows => ImportError::empty_input("no items found in the file"),
        })?;
        let output = json!({
            "headers": grid.headers,
            "raw_rows": raw_rows,
            "rows": grid.rows.len(),
            "empty_rows_dropped": raw_rows - grid.rows.len(),
        });
        Ok(StageOutcome::new(grid, output))
    }

    pub async fn infer_mapping(
        oracle: &dyn Oracle,
        headers: &[String],
        sample: &[Vec<grid::Cell>],
    ) -> Result<StageOutcome<ColumnMapping>, ImportError> {
        let mapping = mapping::infer_mapping(oracle, headers, sample)
            .await
            .map_err(|err| {
                warn!(target = "resale.oracle", error = %err, "column_mapping_failed");
                ImportError::mapping_oracle(err.to_string())
            })?;
        let output = json!({
            "sample_rows": sample.len(),
            "mapping": mapping.summary(),
        });
        Ok(StageOutcome::new(mapping, output))
    }

    pub fn require_columns(inverted: &InvertedMapping) -> Result<(), ImportError> {
        let missing = inverted.missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::required_columns_missing(&missing))
        }
    }

    pub async fn backfill_categories(
        oracle: &dyn Oracle,
        store: &dyn ItemStore,
        grid: &NormalizedGrid,
        inverted: &InvertedMapping,
        batch_size: usize,
    ) -> Result<StageOutcome<CategoryMap>, ImportError> {
        let Some(name_column) = inverted
            .header(TargetColumn::Name)
            .and_then(|header| grid.column_index(header))
        else {
            return Ok(StageOutcome::new(CategoryMap::new(), json!({ "products": 0 })));
        };
        let names = categorize::collect_product_names(grid, name_column);
        let existing = match store.fetch_distinct_categories().await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(target = "resale.store", error = %err, "existing_categories_unavailable");
                Vec::new()
            }
        };
        let assigned = categorize::backfill_categories(oracle, &names, &existing, batch_size).await;
        let output = json!({
            "products": names.len(),
            "existing_categories": existing.len(),
            "assigned": assigned.len(),
        });
        Ok(StageOutcome::new(assigned, output))
    }

    pub async fn fetch_existing(
        store: &dyn ItemStore,
    ) -> Result<StageOutcome<HashSet<String>>, ImportError> {
        let names = store
            .fetch_all_names()
            .await
            .map_err(|err| ImportError::storage("fetch_existing", err.to_string()))?;
        let output = json!({ "existing_names": names.len() });
        Ok(StageOutcome::new(names, output))
    }

    pub fn reconcile_rows(
        grid: &NormalizedGrid,
        ctx: &ReconcileContext<'_>,
    ) -> Result<StageOutcome<Reconciliation>, ImportError> {
        let reconciliation = reconcile::reconcile_rows(grid, ctx);
        if reconciliation.items.is_empty() {
            return Err(ImportError::no_valid_rows(format!(
                "none of the {} rows could be imported",
                grid.rows.len()
            )));
        }
        let output = json!({
            "accepted": reconciliation.items.len(),
            "skipped": reconciliation.skipped,
        });
        Ok(StageOutcome::new(reconciliation, output))
    }

    pub async fn write_batch(
        store: &dyn ItemStore,
        items: &[NewItem],
    ) -> Result<StageOutcome<usize>, ImportError> {
        let inserted = store.insert_batch(items).await.map_err(|err| {
            warn!(target = "resale.store", error = %err, count = items.len(), "batch_rolled_back");
            ImportError::storage("write_batch", err.to_string())
        })?;
        Ok(StageOutcome::new(inserted, json!({ "inserted": inserted })))
    }
}
