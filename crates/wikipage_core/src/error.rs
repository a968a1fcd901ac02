use thiserror::Error;

/// Contract failures raised by page handlers.
///
/// These travel inside `anyhow::Error`; callers that need to tell them apart
/// from I/O failures use `error.downcast_ref::<PageError>()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("{operation} is not supported by page {page}")]
    Unsupported { operation: &'static str, page: String },

    #[error("page not found: {0}")]
    NotFound(String),

    #[error("version {version} of {page} does not exist")]
    InvalidVersion { page: String, version: String },
}

impl PageError {
    pub fn unsupported(operation: &'static str, page: impl Into<String>) -> Self {
        Self::Unsupported {
            operation,
            page: page.into(),
        }
    }
}

/// True when `error` is a [`PageError::Unsupported`] contract failure.
pub fn is_unsupported(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<PageError>(),
        Some(PageError::Unsupported { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_survives_anyhow_round_trip() {
        let error: anyhow::Error = PageError::unsupported("history", "DeletePage").into();
        assert!(is_unsupported(&error));
        assert_eq!(
            error.to_string(),
            "history is not supported by page DeletePage"
        );
    }

    #[test]
    fn other_errors_are_not_unsupported() {
        let error: anyhow::Error = PageError::NotFound("Foo".to_string()).into();
        assert!(!is_unsupported(&error));
        assert!(!is_unsupported(&anyhow::anyhow!("disk full")));
    }
}
