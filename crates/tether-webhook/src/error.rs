use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("{0}")]
    Validation(String),

    #[error("webhook target blocked: {0}")]
    SsrfBlocked(String),

    #[error("Store error: {0}")]
    Store(#[from] tether_store::StoreError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("test delivery failed: status {status}, response: {body}")]
    TestFailed { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, WebhookError>;
