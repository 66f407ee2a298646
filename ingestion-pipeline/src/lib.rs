#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod extractor;
pub mod pipeline;
pub mod upload;
pub mod utils;

use common::storage::store::DocumentRef;
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionReport, IngestionTuning};
use tracing::{error, info};

/// Processes upload notifications one after another. Keys arrive URL-encoded
/// and are decoded before use. A failed document does not stop the rest; its
/// job is already marked failed by the pipeline.
pub async fn process_notifications(
    pipeline: &IngestionPipeline,
    documents: Vec<DocumentRef>,
) -> Vec<Result<IngestionReport, common::error::AppError>> {
    let mut results = Vec::with_capacity(documents.len());
    for document in documents {
        let key = upload::decode_notification_key(&document.key);
        let result = pipeline
            .process_upload(DocumentRef::new(document.bucket, key.clone()))
            .await;
        match &result {
            Ok(report) => info!(%key, job_id = %report.job_id, "upload processed"),
            Err(err) => error!(%key, error = %err, "upload processing failed"),
        }
        results.push(result);
    }
    results
}
