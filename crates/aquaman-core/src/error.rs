use thiserror::Error;

/// The error taxonomy surfaced by the core. Each variant names the trigger
/// from the error-handling design and carries enough context to log or
/// report without the caller re-deriving it. `status_code` gives the HTTP
/// status the proxy pipeline maps each variant to; it returns `None` for
/// variants that never reach an HTTP response (audit errors are logged, not
/// surfaced inline, per the fail-open-for-audit policy).
#[derive(Debug, Error)]
pub enum AquamanError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("credential missing for service '{service}'")]
    CredentialMissing { service: String },

    #[error("backend transient error: {0}")]
    BackendTransient(String),

    #[error("backend permission denied: {0}")]
    BackendPermissionDenied(String),

    #[error("backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("bad ciphertext: {0}")]
    BadCiphertext(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("audit write error: {0}")]
    AuditWrite(String),

    #[error("audit verify error: {0}")]
    AuditVerify(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl AquamanError {
    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// The HTTP status this error maps to per the error-handling design.
    /// `None` means the error is never surfaced as an HTTP response
    /// (audit-log errors are logged to stderr and do not fail the request).
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::BadInput(_) => Some(400),
            Self::UnknownService(_) => Some(404),
            Self::CredentialMissing { .. } => Some(503),
            Self::BackendTransient(_) => Some(503),
            Self::BackendPermissionDenied(_) => Some(503),
            Self::BackendNotAvailable(_) => None,
            Self::BadCiphertext(_) => None,
            Self::UpstreamError(_) => Some(502),
            Self::UpstreamTimeout(_) => Some(504),
            Self::AuditWrite(_) => None,
            Self::AuditVerify(_) => None,
            Self::Io { .. } => Some(500),
        }
    }

    /// Whether this error kind should be retried once with jitter before
    /// being surfaced, per the `BackendError::Transient` policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendTransient(_))
    }
}
