use thiserror::Error;

/// Errors produced by the ModelSocket client.
#[derive(Debug, Error)]
pub enum ModelSocketError {
    #[error("connection closed")]
    Closed,
    #[error("sequence closed")]
    SeqClosed,
    #[error("operation timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid sequence state")]
    InvalidState,
    #[error("unexpected event")]
    UnexpectedEvent,
    #[error("chunk buffer full")]
    BufferFull,
    #[error("tool not found: {name}")]
    ToolNotFound { name: String },
    #[error("transport {op} error: {source}")]
    Transport {
        op: &'static str,
        url: Option<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("send {op} error: {source}")]
    Send {
        op: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        seq_id: Option<String>,
        cid: Option<String>,
    },
    #[error("sequence {seq_id} failed: {message}")]
    Seq { seq_id: String, message: String },
}

impl ModelSocketError {
    pub(crate) fn transport(
        op: &'static str,
        url: Option<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            op,
            url,
            source: source.into(),
        }
    }

    pub(crate) fn send_failed(
        op: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Send {
            op,
            source: source.into(),
        }
    }

    /// True when the error means the connection or sequence is gone and the
    /// handle is no longer usable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::SeqClosed)
    }
}
