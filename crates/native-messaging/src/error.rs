use thiserror::Error;

#[derive(Error, Debug)]
pub enum NativeMessagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
