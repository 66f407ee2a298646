use std::path::PathBuf;

use clap::{Parser, Subcommand};
use common::storage::types::{bank_question::QuestionStatus, law::Law};

fn parse_status(raw: &str) -> Result<QuestionStatus, String> {
    raw.parse()
}

fn parse_law(raw: &str) -> Result<Law, String> {
    raw.parse()
}

#[derive(Debug, Parser)]
#[command(
    name = "question-bank",
    about = "Extract exam questions from PDFs and curate them into a question bank"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run extraction for documents that are already in storage
    Ingest {
        #[arg(long, default_value = "uploads")]
        bucket: String,
        /// URL-encoded object key, normally `uploads/{jobId}/{fileName}`; repeatable
        #[arg(long = "key", required = true)]
        keys: Vec<String>,
    },
    /// Store a local PDF as an upload and run extraction on it
    Upload {
        #[arg(long)]
        file: PathBuf,
        /// Job id to use; a new one is generated when omitted
        #[arg(long)]
        job_id: Option<String>,
        #[arg(long, default_value = "uploads")]
        bucket: String,
    },
    /// Create a job for hand-curated questions
    CreateJob {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Add a question from a JSON file to a job
    AddQuestion {
        job_id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Set the review status of one question
    Review {
        question_id: String,
        #[arg(value_parser = parse_status)]
        status: QuestionStatus,
        #[arg(long)]
        reviewed_by: Option<String>,
    },
    /// Set the review status of up to 100 questions
    BulkReview {
        #[arg(long, value_parser = parse_status)]
        status: QuestionStatus,
        #[arg(long)]
        reviewed_by: Option<String>,
        #[arg(required = true)]
        question_ids: Vec<String>,
    },
    Publish {
        job_id: String,
    },
    Unpublish {
        job_id: String,
    },
    /// Recompute a job's counters from its questions
    Reconcile {
        job_id: String,
    },
    /// List jobs, newest first
    Jobs {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show a job together with its questions
    Job {
        job_id: String,
    },
    /// List questions, optionally filtered by law and status
    Questions {
        #[arg(long, value_parser = parse_law)]
        law: Option<Law>,
        #[arg(long, value_parser = parse_status)]
        status: Option<QuestionStatus>,
        #[arg(long)]
        limit: Option<usize>,
    },
}
