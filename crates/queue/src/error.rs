use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("malformed entry in queue {queue}: {message}")]
    Malformed { queue: String, message: String },
}

impl Error {
    #[must_use]
    pub fn malformed(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            queue: queue.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
