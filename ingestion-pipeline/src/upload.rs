use url::form_urlencoded;
use uuid::Uuid;

pub const UPLOAD_PREFIX: &str = "uploads";
pub const FALLBACK_FILE_NAME: &str = "unknown.pdf";

/// Job id and display name derived from an upload key of the form
/// `uploads/{jobId}/{fileName}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub job_id: String,
    pub file_name: String,
}

impl UploadTarget {
    /// Keys that do not carry a job id segment get a freshly generated one.
    pub fn from_key(key: &str) -> Self {
        let segments: Vec<&str> = key.split('/').collect();

        let job_id = match segments.as_slice() {
            [prefix, job_id, _, ..] if *prefix == UPLOAD_PREFIX && !job_id.trim().is_empty() => {
                (*job_id).to_string()
            }
            _ => Uuid::now_v7().to_string(),
        };

        let file_name = segments
            .last()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_FILE_NAME)
            .to_string();

        Self { job_id, file_name }
    }
}

/// Decodes an object key as delivered in a storage event notification, where
/// spaces arrive as `+` and other bytes percent-encoded.
pub fn decode_notification_key(key: &str) -> String {
    // `&` and `=` are pair separators for the form decoder, not key content.
    let escaped = key.replace('&', "%26").replace('=', "%3D");
    form_urlencoded::parse(escaped.as_bytes())
        .map(|(name, _)| name.into_owned())
        .collect()
}

/// Object key under which an upload for `job_id` is stored.
pub fn upload_key(job_id: &str, file_name: &str) -> String {
    format!("{UPLOAD_PREFIX}/{job_id}/{file_name}")
}
