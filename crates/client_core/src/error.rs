use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("storage returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("storage request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("server url must use http or https, got {0}")]
    UnsupportedScheme(String),
    #[error("channel is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("another call is already in progress")]
    Busy,
    #[error("no incoming call to answer")]
    NotRinging,
    #[error("no active call")]
    NoActiveCall,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("no open conversation bubble for {0}")]
    NoSuchBubble(String),
    #[error("{0} is not loaded on this client")]
    NotTracked(String),
    #[error("no pending notification {0}")]
    NoSuchNotification(i64),
}
