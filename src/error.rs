use thiserror::Error;

/// Errors that can occur while the bridge is running.
///
/// Each variant carries enough context to diagnose the failure without
/// needing to inspect the originating error directly. Only [`BridgeError::Open`]
/// is fatal; everything else is handled per event or per iteration.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The serial port could not be opened at startup.
    #[error("failed to open serial port {port}: {detail}")]
    Open { port: String, detail: String },

    /// Reading from an already-open serial port failed mid-session.
    #[error("serial read failed: {detail}")]
    Read { detail: String },

    /// The remote server replied with a status other than 200.
    #[error("HTTP {status} from {url}")]
    Http {
        status: u16,
        url: String,
        /// Raw response body, surfaced for operator diagnosis.
        body: String,
    },

    /// The request never produced a response (timeout, refused, DNS failure).
    #[error("request to {url} failed: {detail}")]
    Request { url: String, detail: String },
}
