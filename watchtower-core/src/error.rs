use thiserror::Error;

pub type WatchtowerResult<T> = Result<T, WatchtowerError>;

#[derive(Error, Debug)]
pub enum WatchtowerError {
    #[error("Profile directory '{path}' cannot be read: {source}")]
    ProfileDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile '{name}': {reason}")]
    InvalidProfile { name: String, reason: String },

    #[error("Backend request failed: {0}")]
    Backend(String),

    #[error("Summarizer call failed: {0}")]
    Summarizer(String),

    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
