use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShelfError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Link error at {path}: {source}")]
    Link {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl ShelfError {
    pub(crate) fn link(path: &std::path::Path, source: std::io::Error) -> Self {
        ShelfError::Link {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShelfError>;
