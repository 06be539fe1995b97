#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Lock {0} already exists")]
    AlreadyLocked(String),

    #[error("Deployment temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("{0} container config currently not supported")]
    NotSupported(String),

    #[error("Invalid challenge config: {0}")]
    InvalidConfig(String),

    #[error("Challenge {0} already exists")]
    DuplicateId(String),

    #[error("Challenge {0} does not exist")]
    NotFound(String),

    #[error("Redis error: {source}")]
    Redis {
        #[from]
        source: redis::RedisError,
    },

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Storage error: {source}")]
    Storage {
        #[from]
        source: anyhow::Error,
    },
}
