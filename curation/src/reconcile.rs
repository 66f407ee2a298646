use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::extraction_job::{CounterDelta, ExtractionJob, ReconcileReport},
    },
};
use tracing::{info, warn};

/// Recomputes a job's counters from the questions it owns.
pub async fn reconcile_job(db: &SurrealDbClient, job_id: &str) -> Result<ReconcileReport, AppError> {
    let report = ExtractionJob::reconcile_counters(db, job_id).await?;
    if !report.changed() {
        info!(job_id, "job counters already consistent");
    }
    Ok(report)
}

/// Applies `delta` to a job's counters. If the update fails the counters are
/// recomputed from the job's questions instead, and the error is returned
/// only when that fails as well. A missing job is skipped.
pub(crate) async fn settle_job_counters(
    db: &SurrealDbClient,
    job_id: &str,
    delta: CounterDelta,
) -> Result<(), AppError> {
    match ExtractionJob::adjust_counters(db, job_id, delta).await {
        Ok(_) => Ok(()),
        Err(AppError::NotFound(_)) => {
            warn!(job_id, "owning job missing; counters not adjusted");
            Ok(())
        }
        Err(err) => {
            warn!(job_id, error = %err, "counter update failed; reconciling");
            ExtractionJob::reconcile_counters(db, job_id)
                .await
                .map(|_| ())
                .inspect_err(|err| warn!(job_id, error = %err, "reconciliation failed"))
        }
    }
}
