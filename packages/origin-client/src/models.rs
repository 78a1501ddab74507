use serde::{Deserialize, Serialize};

/// What the gateway asks the extractor for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
    pub include_metadata: bool,
    pub detect_region: bool,
}

/// Extraction result returned by the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    pub media_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub duration_secs: Option<u64>,
    pub download_url: String,
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Error body the extractor sends alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

pub(crate) fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed
            .error
            .or(parsed.message)
            .unwrap_or_else(|| "origin returned an error".to_string()),
        Err(_) => {
            if body.trim().is_empty() {
                "origin returned an error".to_string()
            } else {
                body.chars().take(200).collect()
            }
        }
    }
}
