use std::sync::Arc;

use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{DocumentRef, StorageManager},
        types::{
            bank_question::{resolve_list_limit, BankQuestion},
            extraction_job::ExtractionJob,
        },
    },
    utils::config::AppConfig,
};
use curation::{
    add_manual_question, create_manual_job, reconcile_job, ManualJob, ManualQuestion,
    ReviewCoordinator,
};
use ingestion_pipeline::{process_notifications, upload::upload_key, IngestionPipeline};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::cli::Command;

/// Long-lived handles shared by every command.
pub struct App {
    pub db: Arc<SurrealDbClient>,
    pub storage: StorageManager,
    pub pipeline: IngestionPipeline,
    pub reviews: ReviewCoordinator,
    pub config: AppConfig,
}

impl App {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        pipeline: IngestionPipeline,
        config: AppConfig,
    ) -> Self {
        Self {
            reviews: ReviewCoordinator::new(Arc::clone(&db)),
            db,
            storage,
            pipeline,
            config,
        }
    }

    fn list_limit(&self, requested: Option<usize>) -> Result<usize, AppError> {
        resolve_list_limit(Some(requested.unwrap_or(self.config.review_default_limit)))
    }

    /// Runs one command and returns what should be printed.
    pub async fn execute(&self, command: Command) -> Result<Value, AppError> {
        let output = match command {
            Command::Ingest { bucket, keys } => {
                let documents: Vec<DocumentRef> = keys
                    .iter()
                    .map(|key| DocumentRef::new(bucket.clone(), key.clone()))
                    .collect();
                let results = process_notifications(&self.pipeline, documents).await;

                let mut entries = Vec::with_capacity(results.len());
                for (key, result) in keys.iter().zip(results) {
                    entries.push(match result {
                        Ok(report) => json!({ "key": key, "report": to_value(&report)? }),
                        Err(err) => json!({ "key": key, "error": err.to_string() }),
                    });
                }
                Value::Array(entries)
            }
            Command::Upload {
                file,
                job_id,
                bucket,
            } => {
                let file_name = file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| {
                        AppError::Validation(format!("{} has no file name", file.display()))
                    })?
                    .to_string();
                let job_id = job_id.unwrap_or_else(|| Uuid::now_v7().to_string());
                let key = upload_key(&job_id, &file_name);

                let data = tokio::fs::read(&file).await?;
                self.storage.put(&key, Bytes::from(data)).await?;
                info!(%key, "upload stored");

                let report = self.pipeline.process_upload(DocumentRef::new(bucket, key)).await?;
                to_value(&report)?
            }
            Command::CreateJob {
                title,
                description,
                category,
            } => {
                let job = create_manual_job(
                    &self.db,
                    &ManualJob {
                        title,
                        description,
                        category,
                    },
                )
                .await?;
                to_value(&job)?
            }
            Command::AddQuestion { job_id, file } => {
                let raw = tokio::fs::read(&file).await?;
                let input: ManualQuestion = serde_json::from_slice(&raw).map_err(|err| {
                    AppError::Validation(format!("{} is not a valid question: {err}", file.display()))
                })?;
                let question = add_manual_question(&self.db, &job_id, &input).await?;
                to_value(&question)?
            }
            Command::Review {
                question_id,
                status,
                reviewed_by,
            } => {
                let outcome = self
                    .reviews
                    .review(&question_id, status, reviewed_by.as_deref())
                    .await?;
                to_value(&outcome)?
            }
            Command::BulkReview {
                status,
                reviewed_by,
                question_ids,
            } => {
                let outcome = self
                    .reviews
                    .bulk_review(&question_ids, status, reviewed_by.as_deref())
                    .await?;
                to_value(&outcome)?
            }
            Command::Publish { job_id } => {
                to_value(&ExtractionJob::set_published(&self.db, &job_id, true).await?)?
            }
            Command::Unpublish { job_id } => {
                to_value(&ExtractionJob::set_published(&self.db, &job_id, false).await?)?
            }
            Command::Reconcile { job_id } => to_value(&reconcile_job(&self.db, &job_id).await?)?,
            Command::Jobs { limit } => {
                let limit = self.list_limit(limit)?;
                to_value(&ExtractionJob::list_all(&self.db, limit).await?)?
            }
            Command::Job { job_id } => {
                let job = ExtractionJob::get(&self.db, &job_id).await?;
                let questions = BankQuestion::list_by_job(&self.db, &job_id).await?;
                json!({ "job": to_value(&job)?, "questions": to_value(&questions)? })
            }
            Command::Questions { law, status, limit } => {
                let limit = self.list_limit(limit)?;
                let questions = match (law, status) {
                    (Some(law), status) => {
                        BankQuestion::list_by_law(&self.db, law, status, limit).await?
                    }
                    (None, Some(status)) => {
                        BankQuestion::list_by_status(&self.db, status, limit).await?
                    }
                    (None, None) => BankQuestion::list_all(&self.db, limit).await?,
                };
                to_value(&questions)?
            }
        };
        Ok(output)
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|err| AppError::InternalError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use common::storage::types::bank_question::QuestionStatus;

    async fn test_app() -> App {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("cli_test", &database)
                .await
                .expect("in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("indexes");

        let config = AppConfig::default();
        let storage = StorageManager::memory();
        let openai_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new().with_api_key("test"),
        ));
        let pipeline =
            IngestionPipeline::new(Arc::clone(&db), openai_client, &config, storage.clone());
        App::new(db, storage, pipeline, config)
    }

    #[tokio::test]
    async fn curated_job_can_be_published() {
        let app = test_app().await;

        let job = app
            .execute(Command::CreateJob {
                title: "Restarts".into(),
                description: String::new(),
                category: None,
            })
            .await
            .expect("create job");
        let job_id = job["id"].as_str().expect("job id").to_string();

        let err = app
            .execute(Command::Publish {
                job_id: job_id.clone(),
            })
            .await
            .expect_err("nothing approved yet");
        assert!(matches!(err, AppError::Conflict(_)));

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"text":"Who restarts after a goal?","options":["Scoring team","Conceding team","Referee","Either"],"correctAnswer":1,"explanation":"Kick-off by the team that conceded","law":"Law 8","lawReference":"Law 8.1"}}"#
        )
        .expect("write question");

        let question = app
            .execute(Command::AddQuestion {
                job_id: job_id.clone(),
                file: file.path().to_path_buf(),
            })
            .await
            .expect("add question");
        assert_eq!(question["status"], "approved");

        let published = app
            .execute(Command::Publish {
                job_id: job_id.clone(),
            })
            .await
            .expect("publish");
        assert_eq!(published["published"], true);

        let question_id = question["id"].as_str().expect("question id").to_string();
        app.execute(Command::Review {
            question_id,
            status: QuestionStatus::Rejected,
            reviewed_by: None,
        })
        .await
        .expect("review");

        let detail = app
            .execute(Command::Job { job_id })
            .await
            .expect("job detail");
        assert_eq!(detail["job"]["published"], false);
        assert_eq!(detail["job"]["rejected_count"], 1);
        assert_eq!(detail["questions"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn ingest_reports_each_key_separately() {
        let app = test_app().await;

        let output = app
            .execute(Command::Ingest {
                bucket: "uploads".into(),
                keys: vec!["uploads/job-gone/a.pdf".into()],
            })
            .await
            .expect("ingest returns per-key results");

        assert_eq!(output[0]["key"], "uploads/job-gone/a.pdf");
        assert!(output[0]["error"].is_string());

        let job = app
            .execute(Command::Job {
                job_id: "job-gone".into(),
            })
            .await
            .expect("job detail");
        assert_eq!(job["job"]["status"], "failed");
        assert_eq!(job["questions"], json!([]));
    }

    #[tokio::test]
    async fn listing_limits_are_validated() {
        let app = test_app().await;

        let jobs = app
            .execute(Command::Jobs { limit: None })
            .await
            .expect("list jobs");
        assert_eq!(jobs, json!([]));

        let err = app
            .execute(Command::Questions {
                law: None,
                status: None,
                limit: Some(500),
            })
            .await
            .expect_err("limit too large");
        assert!(matches!(err, AppError::Validation(_)));
    }
}
