//! Shared HTTP error mapping

use agent_core::TransportError;

/// Map a `reqwest` failure onto the transport taxonomy
pub fn request_error(err: &reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() {
        TransportError::Unavailable(err.to_string())
    } else if err.is_decode() {
        TransportError::Malformed(err.to_string())
    } else {
        TransportError::Http(err.to_string())
    }
}

/// Map a non-success status onto the transport taxonomy
pub fn status_error(status: u16, body: String) -> TransportError {
    match status {
        401 | 403 => TransportError::Auth(body),
        429 => TransportError::RateLimited(body),
        500..=599 => TransportError::Unavailable(format!("status {status}: {body}")),
        _ => TransportError::Status { status, body },
    }
}
