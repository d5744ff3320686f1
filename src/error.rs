use reqwest::StatusCode;
use thiserror::Error;

/// Failure resolving the active folder from the remote control table.
#[derive(Debug, Error)]
pub enum ConfigFetchError {
    /// Transport-level failure talking to the control endpoint.
    #[error("control request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The control endpoint answered with a non-success status.
    #[error("control endpoint returned {0}")]
    Status(StatusCode),

    /// The body was not a JSON array of control rows.
    #[error("malformed control response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The control table exists but holds no rows.
    #[error("control table {table} returned no rows")]
    Empty { table: String },
}

/// Failure listing the media files of a folder.
#[derive(Debug, Error)]
pub enum ListFilesError {
    /// Transport-level failure talking to the listing endpoint.
    #[error("list-files request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The listing endpoint answered with a non-success status.
    #[error("list-files returned {0}")]
    Status(StatusCode),

    /// The response body was not the expected `{ files: [...] }` shape.
    #[error("malformed list-files response: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ListFilesError {
    /// Client errors and malformed payloads will not improve on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status(status) => status.is_server_error(),
            Self::Malformed(_) => false,
        }
    }
}

/// Failure handing a frame to the presentation surface.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The external player could not be started.
    #[error("failed to launch player {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
