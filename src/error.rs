use std::fmt;

/// Business-logic failure kinds, distinct from transport/local I/O
/// failures (those propagate as plain `anyhow::Error` and abort the
/// current sync pass).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfstoreError {
    NotFound { what: String },
    VersionMismatch { filename: String, expected: i64, got: i64 },
}

impl fmt::Display for SurfstoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfstoreError::NotFound { what } => write!(f, "not found: {what}"),
            SurfstoreError::VersionMismatch {
                filename,
                expected,
                got,
            } => write!(
                f,
                "version mismatch for {filename}: expected {expected}, got {got}"
            ),
        }
    }
}

impl std::error::Error for SurfstoreError {}
