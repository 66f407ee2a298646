use std::time::Duration;

use common::{
    storage::{
        db::{WriteRetryPolicy, MAX_BATCH_WRITE_ITEMS},
        types::bank_question::AUTO_APPROVE_THRESHOLD,
    },
    utils::config::AppConfig,
};

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub auto_approve_threshold: f64,
    pub batch_write_size: usize,
    pub extraction_timeout: Duration,
    pub write_retry_attempts: usize,
    pub write_retry_base_delay_ms: u64,
    pub write_retry_max_delay_ms: u64,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            auto_approve_threshold: AUTO_APPROVE_THRESHOLD,
            batch_write_size: MAX_BATCH_WRITE_ITEMS,
            extraction_timeout: Duration::from_secs(300),
            write_retry_attempts: 3,
            write_retry_base_delay_ms: 50,
            write_retry_max_delay_ms: 2_000,
        }
    }
}

impl IngestionTuning {
    pub fn write_retry(&self) -> WriteRetryPolicy {
        WriteRetryPolicy {
            attempts: self.write_retry_attempts,
            base_delay_ms: self.write_retry_base_delay_ms,
            max_delay_ms: self.write_retry_max_delay_ms,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                extraction_timeout: Duration::from_secs(config.extraction_timeout_secs),
                ..IngestionTuning::default()
            },
        }
    }
}
