use std::fmt;

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failure categories surfaced at the device boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// `bind` called while the device is already bound.
    AlreadyBound,
    /// Opening the underlying device failed.
    DeviceOpenFailed,
    /// Backing store allocation failed.
    OutOfMemory,
    /// Device is unbound or draining; no new I/O is admitted.
    DeviceUnavailable,
    /// The underlying device rejected or errored a forwarded request.
    ForwardFailed,
    /// Malformed request (misaligned or empty segment, sector overflow).
    InvalidRequest,
}

/// Errors surfaced by [`VirtualDevice`](crate::VirtualDevice).
#[derive(Clone, Debug)]
pub struct DeviceError {
    kind: DeviceErrorKind,
    message: Option<String>,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn kind(&self) -> DeviceErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for DeviceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = DeviceError::with_message(DeviceErrorKind::DeviceOpenFailed, "no such device");
        assert_eq!(err.to_string(), "DeviceOpenFailed: no such device");
        assert_eq!(
            DeviceError::new(DeviceErrorKind::AlreadyBound).to_string(),
            "AlreadyBound"
        );
    }
}
