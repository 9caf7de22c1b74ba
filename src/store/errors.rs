//! Blob Store Error Types
//!
//! Structured errors for store operations.

/// Blob store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("No blob named {0}")]
    NotFound(String),

    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid blob name: {0:?}")]
    InvalidName(String),

    #[error("I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize store at {path}: {source}")]
    Initialization {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(name: &str, source: std::io::Error) -> Self {
        StoreError::Io {
            name: name.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = StoreError::PayloadTooLarge {
            size: 2048,
            limit: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }
}
