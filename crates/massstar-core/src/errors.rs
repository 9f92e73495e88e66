/// Core error type for the fleet.
///
/// Adapter crates should map their backend errors into this type so the fleet
/// can apply one failure policy (fatal at startup, log-and-drop afterwards).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session {session} failed to open: {reason}")]
    Startup { session: String, reason: String },

    #[error("{op} timed out after {millis}ms")]
    Timeout { op: &'static str, millis: u64 },

    #[error("session is closed")]
    Closed,

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
