use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Backend returned HTTP {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("Malformed payload: {0}")]
    Payload(String),
    #[error("Storage operation failed: {0}")]
    Storage(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Invalid value: {0}")]
    Invalid(String),
    #[error("Realtime channel failed: {0}")]
    Realtime(String),
    #[error("Media transport failed: {0}")]
    Media(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub async fn check_status(resp: reqwest::Response) -> ServiceResult<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::Backend { status, body })
}
