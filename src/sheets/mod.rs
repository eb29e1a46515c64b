pub mod google;

use async_trait::async_trait;

use crate::sales::SalesRecord;

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("{0} environment variable not set")]
    MissingSetting(&'static str),
    #[error("invalid Sheets API base URL: {0}")]
    InvalidEndpoint(String),
    #[error("invalid service account key: {0}")]
    Credentials(String),
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Google Sheets API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("request to Google failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Append-only target for sales records.
#[async_trait]
pub trait SheetWriter: Send + Sync {
    async fn append_row(&self, record: &SalesRecord) -> Result<(), SheetError>;
}
