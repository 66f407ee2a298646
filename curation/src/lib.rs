pub mod manual;
pub mod reconcile;
pub mod review;

pub use manual::{add_manual_question, create_manual_job, ManualJob, ManualQuestion};
pub use reconcile::reconcile_job;
pub use review::{BulkReviewOutcome, BulkReviewSummary, ItemResult, ReviewCoordinator, ReviewOutcome};
