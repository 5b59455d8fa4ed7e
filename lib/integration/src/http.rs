//! Shared response handling for the reqwest-backed clients.

use crate::error::ConnectorError;
use reqwest::{Response, StatusCode};

/// Maps a transport-level reqwest failure onto a connector error.
pub(crate) fn transport_error(e: reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout
    } else if e.is_connect() {
        ConnectorError::ConnectionFailed {
            reason: e.to_string(),
        }
    } else {
        ConnectorError::ProtocolError {
            reason: e.to_string(),
        }
    }
}

/// Passes successful responses through and classifies the rest.
pub(crate) async fn check_status(response: Response) -> Result<Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ConnectorError::AuthenticationFailed {
                reason: format!("status {}", status.as_u16()),
            })
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());
            Err(ConnectorError::RateLimited { retry_after_secs })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(ConnectorError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
