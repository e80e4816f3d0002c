//! Outcome taxonomy and the mapping to caller-visible status codes.
//!
//! Handlers report failures with [`HandlerError`]: either a
//! [`BusinessError`] carrying an application code, or any other error value.
//! The dispatcher turns every outcome into a [`DispatchError`] before it
//! leaves the dispatch boundary, and [`DispatchError::status`] renders the
//! terminal [`Status`] that a transport reports to the caller.

use std::fmt;

use thiserror::Error;

use crate::error::RpcError;

/// Boxed error for handler failures that carry no business code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reserved status codes.
pub mod code {
    /// No error.
    pub const OK: i32 = 0;
    /// Unknown method or unresolved call identity.
    pub const NOT_FOUND: i32 = 404;
    /// Undecodable payload or recovered panic.
    pub const BAD_REQUEST: i32 = 400;
    /// Request rejected by its validation capability.
    pub const VALIDATION: i32 = -1;
    /// Handler returned an error without a business code.
    pub const HANDLER: i32 = -2;
    /// Response could not be encoded or sent.
    pub const SEND_FAILED: i32 = -3;
    /// Transport failure surfaced from a stream call.
    pub const TRANSPORT: i32 = -4;
}

/// Application-level outcome with a numeric code.
///
/// A code of `0` means "no business error": a handler returning
/// `BusinessError { code: 0, .. }` is treated as successful.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("code={code} msg={message}")]
pub struct BusinessError {
    pub code: i32,
    pub message: String,
}

impl BusinessError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether this value actually signals a failure.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.code != code::OK
    }
}

/// Error returned by a handler method.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business outcome with an application code.
    #[error(transparent)]
    Business(#[from] BusinessError),

    /// Any other failure; surfaced under [`code::HANDLER`].
    #[error("{0}")]
    Other(BoxError),
}

impl HandlerError {
    /// Business error with the given code and message.
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::Business(BusinessError::new(code, message))
    }

    /// Wrap an arbitrary error value.
    pub fn other<E: Into<BoxError>>(err: E) -> Self {
        Self::Other(err.into())
    }
}

impl From<RpcError> for HandlerError {
    fn from(err: RpcError) -> Self {
        Self::Other(Box::new(err))
    }
}

/// Terminal error of a dispatched call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Unknown method or unresolved call identity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed payload, unsupported content type or recovered panic.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Business outcome, passed through verbatim.
    #[error("business error {code}: {message}")]
    Business { code: i32, message: String },

    /// Transport failure while priming a stream call.
    #[error(transparent)]
    Transport(#[from] RpcError),

    /// Error returned by a stream handler, not remapped.
    #[error(transparent)]
    Stream(HandlerError),
}

impl DispatchError {
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::Business {
            code,
            message: message.into(),
        }
    }

    /// Category of this outcome, independent of its numeric code.
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::NotFound(_) => StatusKind::NotFound,
            Self::BadRequest(_) => StatusKind::BadRequest,
            Self::Business { .. } | Self::Stream(_) => StatusKind::Business,
            Self::Transport(_) => StatusKind::Transport,
        }
    }

    /// Stable numeric code for this outcome.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound(_) => code::NOT_FOUND,
            Self::BadRequest(_) => code::BAD_REQUEST,
            Self::Business { code, .. } => *code,
            Self::Transport(_) => code::TRANSPORT,
            Self::Stream(HandlerError::Business(e)) => e.code,
            Self::Stream(HandlerError::Other(_)) => code::HANDLER,
        }
    }

    /// Render the caller-visible status.
    pub fn status(&self) -> Status {
        let message = match self {
            Self::Business { message, .. } => message.clone(),
            Self::Stream(HandlerError::Business(e)) => e.message.clone(),
            other => other.to_string(),
        };
        Status::new(self.kind(), self.code(), message)
    }
}

/// Map the value returned by a unary handler.
///
/// `Ok(())` means the call succeeded and the response should be sent.
pub(crate) fn map_handler_error(err: HandlerError) -> Result<(), DispatchError> {
    match err {
        HandlerError::Business(e) if !e.is_error() => Ok(()),
        HandlerError::Business(e) => Err(DispatchError::business(e.code, e.message)),
        HandlerError::Other(e) => Err(DispatchError::business(
            code::HANDLER,
            format!("call error: {e}"),
        )),
    }
}

/// Category of a terminal status.
///
/// Business codes are chosen by handlers and may overlap the reserved
/// codes, so callers branch on the kind rather than the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Unknown method or unresolved call identity.
    NotFound,
    /// Undecodable payload, unsupported content type or recovered panic.
    BadRequest,
    /// Outcome reported by a handler, validation, or a failed reply.
    Business,
    /// The call channel itself failed.
    Transport,
}

/// Caller-visible terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub code: i32,
    pub message: String,
}

impl Status {
    pub fn new(kind: StatusKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// Business status with an application code.
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::new(StatusKind::Business, code, message)
    }

    /// Transport failure, reported under [`code::TRANSPORT`].
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Transport, code::TRANSPORT, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StatusKind::NotFound
    }

    pub fn is_bad_request(&self) -> bool {
        self.kind == StatusKind::BadRequest
    }

    pub fn is_business(&self) -> bool {
        self.kind == StatusKind::Business
    }

    pub fn is_transport(&self) -> bool {
        self.kind == StatusKind::Transport
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

impl From<&DispatchError> for Status {
    fn from(err: &DispatchError) -> Self {
        err.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_code_is_success() {
        let err = HandlerError::business(0, "fine");
        assert!(map_handler_error(err).is_ok());
    }

    #[test]
    fn test_nonzero_code_passes_through() {
        let err = HandlerError::business(1001, "insufficient balance");
        match map_handler_error(err) {
            Err(DispatchError::Business { code, message }) => {
                assert_eq!(code, 1001);
                assert_eq!(message, "insufficient balance");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_other_error_uses_generic_code() {
        let err = HandlerError::other("database unavailable");
        let mapped = map_handler_error(err).unwrap_err();
        assert_eq!(mapped.code(), code::HANDLER);
        assert!(mapped.to_string().contains("database unavailable"));
    }

    #[test]
    fn test_reserved_codes_are_distinct() {
        let codes = [
            code::OK,
            code::NOT_FOUND,
            code::BAD_REQUEST,
            code::VALIDATION,
            code::HANDLER,
            code::SEND_FAILED,
            code::TRANSPORT,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_status_rendering() {
        let status = DispatchError::NotFound("unknown method Echo.Missing".into()).status();
        assert!(status.is_not_found());
        assert!(status.message.contains("Echo.Missing"));

        let status = DispatchError::business(7, "nope").status();
        assert_eq!(status, Status::business(7, "nope"));

        let status = DispatchError::Stream(HandlerError::business(9, "closed")).status();
        assert_eq!(status.code, 9);
        assert_eq!(status.message, "closed");
        assert!(status.is_business());

        let status = DispatchError::Transport(RpcError::StreamClosed).status();
        assert!(status.is_transport());
        assert_eq!(status.code, code::TRANSPORT);
    }

    #[test]
    fn test_business_code_never_reads_as_reserved_kind() {
        let business = DispatchError::business(code::NOT_FOUND, "user not found").status();
        assert_eq!(business.code, 404);
        assert!(business.is_business());
        assert!(!business.is_not_found());

        let business = DispatchError::Stream(HandlerError::business(400, "bad page")).status();
        assert!(!business.is_bad_request());

        let routing = DispatchError::NotFound("unknown method Users.Nope".into()).status();
        assert_eq!(routing.code, 404);
        assert!(routing.is_not_found());
        assert!(!routing.is_business());
        assert_ne!(business.kind, routing.kind);
    }
}
