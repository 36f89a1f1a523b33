// Report fetching and normalization

pub mod archive;
pub mod normalize;

use serde_json::Value;
use std::sync::Arc;

use crate::error::ApiError;
use crate::http_client::QboHttpClient;

pub use archive::{DirArchive, ReportArchive};
pub use normalize::{account_totals, normalize, AccountTotal, NormalizedTable, RowNode};

/// Fetches named reports and hands raw copies to an optional archive
pub struct ReportFetcher {
    http_client: Arc<QboHttpClient>,
    archive: Option<Arc<dyn ReportArchive>>,
}

impl ReportFetcher {
    pub fn new(http_client: Arc<QboHttpClient>) -> Self {
        Self {
            http_client,
            archive: None,
        }
    }

    /// Attach a post-fetch archive hook
    pub fn with_archive(mut self, archive: Arc<dyn ReportArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Fetch the raw document for `report_name`
    pub async fn fetch(&self, report_name: &str) -> Result<Value, ApiError> {
        self.fetch_with_params(report_name, &[]).await
    }

    /// Fetch with extra report parameters (start_date, end_date, ...)
    pub async fn fetch_with_params(
        &self,
        report_name: &str,
        params: &[(String, String)],
    ) -> Result<Value, ApiError> {
        tracing::info!(report = %report_name, "Fetching report");

        let document = self
            .http_client
            .get_json(&["reports", report_name], params, report_name)
            .await?;

        if !document.is_object() {
            tracing::error!(report = %report_name, "Unexpected JSON structure: {}", document);
            return Err(ApiError::MalformedResponse(format!(
                "report {} is not a JSON object",
                report_name
            )));
        }

        self.archive_document(report_name, &document);
        Ok(document)
    }

    /// Fetch and normalize in one step
    pub async fn fetch_table(&self, report_name: &str) -> Result<NormalizedTable, ApiError> {
        let document = self.fetch(report_name).await?;
        Ok(normalize(&document))
    }

    /// Best-effort archive write; failures never reach the caller
    fn archive_document(&self, report_name: &str, document: &Value) {
        let Some(archive) = &self.archive else {
            return;
        };

        match archive.store(report_name, document) {
            Ok(path) => {
                tracing::info!(report = %report_name, "Saved raw JSON to {}", path.display())
            }
            Err(e) => tracing::warn!(
                report = %report_name,
                "Failed to archive raw report: {:#}",
                e
            ),
        }
    }
}
