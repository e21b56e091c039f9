use crate::errors::types::Error;
use std::fmt;

/// Context information for an error
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.component, self.operation)
    }
}

/// Extension trait for attaching the failing component/operation to backend errors.
///
/// Backend crates (NATS, JetStream) return their own error types; this folds them into
/// the matching [`Error`] variant with a readable prefix.
pub trait ErrorExt<T> {
    /// Map the error into [`Error::Transport`]
    fn transport_context(self, ctx: ErrorContext) -> Result<T, Error>;

    /// Map the error into [`Error::Storage`]
    fn storage_context(self, ctx: ErrorContext) -> Result<T, Error>;
}

impl<T, E: fmt::Display> ErrorExt<T> for Result<T, E> {
    fn transport_context(self, ctx: ErrorContext) -> Result<T, Error> {
        self.map_err(|e| Error::Transport(format!("{} failed: {}", ctx, e)))
    }

    fn storage_context(self, ctx: ErrorContext) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(format!("{} failed: {}", ctx, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_prefixes_message() {
        let res: Result<(), &str> = Err("connection refused");
        let err = res
            .transport_context(ErrorContext::new("nats", "publish"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Transport error: nats publish failed: connection refused"
        );
    }

    #[test]
    fn test_ok_passes_through() {
        let res: Result<u32, &str> = Ok(7);
        assert_eq!(res.storage_context(ErrorContext::new("kv", "put")).unwrap(), 7);
    }
}
