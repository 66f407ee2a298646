pub mod config;
pub mod content_hash;
