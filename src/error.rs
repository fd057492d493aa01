use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    // Storage errors
    #[error("IO error on '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed article data: {0}")]
    Codec(#[from] serde_json::Error),

    // Lookup errors
    #[error("Article not found: {0}")]
    ArticleNotFound(String),

    #[error("Article already exists: {0}")]
    DuplicateArticle(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Source already exists: {0}")]
    DuplicateSource(String),

    #[error("Target directory already exists: {}", .0.display())]
    DirectoryExists(PathBuf),

    // Input errors
    #[error("Refresh interval out of range: {0} minutes")]
    InvalidRefreshInterval(u64),

    // Lifecycle errors
    #[error("Write-back queue for source '{0}' is closed")]
    QueueClosed(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by a caller racing stale state (unknown URL or slug).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::ArticleNotFound(_) | StoreError::SourceNotFound(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
