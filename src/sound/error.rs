//! Flat error taxonomy shared by every layer
//!
//! Each layer has its own error enum; `ErrorKind` lets callers branch on
//! what went wrong without caring which layer reported it.

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Path or module missing
    NotFound,
    /// Recognized container with content this decoder cannot parse
    BadFormat,
    /// Deliberately unimplemented codec or variant
    Unsupported,
    /// Mid-stream decode failure
    CorruptData,
    /// Physical read/write failure
    IoFailure,
    /// Output device missing or failed to open
    DeviceUnavailable,
    /// No stream configuration the sink accepts
    UnsupportedFormat,
    /// Module unload while handles are still open
    ResourceInUse,
    /// Module could not be loaded or initialized
    LoadFailure,
    /// Module lacks a required entry point
    MissingEntryPoint,
    /// Operation on a closed handle or sink
    Closed,
    /// Worker thread died
    Internal,
}

impl ErrorKind {
    /// Whether a read failing with this kind may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::IoFailure)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::BadFormat => "bad format",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::CorruptData => "corrupt data",
            ErrorKind::IoFailure => "I/O failure",
            ErrorKind::DeviceUnavailable => "device unavailable",
            ErrorKind::UnsupportedFormat => "unsupported output format",
            ErrorKind::ResourceInUse => "resource in use",
            ErrorKind::LoadFailure => "load failure",
            ErrorKind::MissingEntryPoint => "missing entry point",
            ErrorKind::Closed => "closed",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_io_failure_is_transient() {
        assert!(ErrorKind::IoFailure.is_transient());
        assert!(!ErrorKind::CorruptData.is_transient());
        assert!(!ErrorKind::BadFormat.is_transient());
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::ResourceInUse.to_string(), "resource in use");
    }
}
