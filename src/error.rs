use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Target error: {0}")]
    Target(String),

    #[error("Mapping store error: {0}")]
    Mapping(String),

    #[error("Event stream error: {0}")]
    Stream(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Selection exhausted: wanted {wanted}, selected {selected}")]
    SelectionExhausted { wanted: usize, selected: usize },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;
