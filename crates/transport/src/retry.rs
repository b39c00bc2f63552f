//! Failure classification and the single transparent retry.

use std::error::Error as StdError;
use std::future::Future;
use std::io;

use ce::TransportError;
use tracing::debug;

/// Failure of one request attempt.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// The peer closed the connection; the request may be repeated once.
    Dropped(String),
    Timeout(String),
    Other(String),
    /// Failed before or outside the exchange, e.g. on a local file.
    Local(TransportError),
}

impl AttemptError {
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = error_chain(err);
        if err.is_timeout() {
            AttemptError::Timeout(message)
        } else if is_dropped_connection(err) {
            AttemptError::Dropped(message)
        } else {
            AttemptError::Other(message)
        }
    }

    fn into_transport_error(self) -> TransportError {
        match self {
            AttemptError::Dropped(message) => TransportError::Disconnected { message },
            AttemptError::Timeout(message) => TransportError::Timeout { message },
            AttemptError::Other(message) => TransportError::Request { message },
            AttemptError::Local(error) => error,
        }
    }
}

/// Returns `true` if anything in the error's source chain says the peer
/// dropped the connection.
pub(crate) fn is_dropped_connection(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        // hyper reports a keep-alive connection closed under us this way.
        if e.to_string().contains("connection closed before message completed") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Runs `attempt`, repeating it once if the first try lost its connection.
pub(crate) async fn retry_once<T, F, Fut>(mut attempt: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    match attempt().await {
        Err(AttemptError::Dropped(message)) => {
            debug!(error = %message, "connection dropped by peer, retrying once");
            attempt().await.map_err(AttemptError::into_transport_error)
        }
        other => other.map_err(AttemptError::into_transport_error),
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}
