use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Errors raised while turning a month page into candidate entries.
///
/// `ItemStructure` is recovered locally (the item is skipped); the other
/// variants abort the page's parse.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unrecognized day header: {0:?}")]
    DateFormat(String),

    #[error("page has no recognizable body")]
    MalformedDocument,

    #[error("list item skipped: {0}")]
    ItemStructure(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build archive URL: {0}")]
    UrlConstruction(#[from] url::ParseError),

    #[error("archive returned HTTP {0}")]
    Http(reqwest::StatusCode),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e)
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database commit failed: {0}")]
    CommitFailed(#[from] tokio_rusqlite::Error),

    /// A batch observed its cancellation signal and rolled back. This is a
    /// clean stop, not a failure; callers must not surface it as an error.
    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TomlParse(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Store(StoreError::Cancelled))
    }
}

impl From<tokio_rusqlite::Error> for AppError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        AppError::Store(StoreError::CommitFailed(e))
    }
}
