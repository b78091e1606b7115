use thiserror::Error;

/// Errors produced by the panemux core and server.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("max sessions ({0}) reached")]
    CapExceeded(usize),

    #[error("direction must be 'horizontal' or 'vertical', got '{0}'")]
    BadDirection(String),

    #[error("ratio must be between 0.1 and 0.9, got {0}")]
    RatioOutOfRange(f64),

    #[error("pane {0} has no parent split to resize")]
    NotInSplit(String),

    #[error("failed to start pane: {0}")]
    StartFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("multiplexer not available: {0}")]
    MultiplexerAbsent(String),

    #[error("pane {0} is closed")]
    Closed(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl MuxError {
    /// HTTP status used when an error has to be reported during a viewer
    /// handshake or by an HTTP front end.
    pub fn status_code(&self) -> u16 {
        match self {
            MuxError::NotFound(_) => 404,
            MuxError::BadDirection(_) | MuxError::RatioOutOfRange(_) | MuxError::NotInSplit(_) => {
                400
            }
            MuxError::AlreadyExists(_) => 409,
            MuxError::CapExceeded(_) => 503,
            _ => 500,
        }
    }
}

pub type MuxResult<T> = Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(MuxError::NotFound("p".into()).status_code(), 404);
        assert_eq!(MuxError::RatioOutOfRange(0.95).status_code(), 400);
        assert_eq!(MuxError::CapExceeded(10).status_code(), 503);
        assert_eq!(MuxError::StartFailed("x".into()).status_code(), 500);
    }

    #[test]
    fn messages_name_the_value() {
        let e = MuxError::BadDirection("diagonal".into());
        assert!(e.to_string().contains("diagonal"));
    }
}
