//! RPC status codes and fault classification
//!
//! Error-code labels are drawn only from [`StatusCode`], so the error counter's
//! cardinality is bounded by `methods × 17`.

use std::fmt;

/// The fixed gRPC status code enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// Every code, in wire order
    pub const ALL: [StatusCode; 17] = [
        StatusCode::Ok,
        StatusCode::Cancelled,
        StatusCode::Unknown,
        StatusCode::InvalidArgument,
        StatusCode::DeadlineExceeded,
        StatusCode::NotFound,
        StatusCode::AlreadyExists,
        StatusCode::PermissionDenied,
        StatusCode::ResourceExhausted,
        StatusCode::FailedPrecondition,
        StatusCode::Aborted,
        StatusCode::OutOfRange,
        StatusCode::Unimplemented,
        StatusCode::Internal,
        StatusCode::Unavailable,
        StatusCode::DataLoss,
        StatusCode::Unauthenticated,
    ];

    /// Convert status code to Prometheus label string
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "Cancelled",
            StatusCode::Unknown => "Unknown",
            StatusCode::InvalidArgument => "InvalidArgument",
            StatusCode::DeadlineExceeded => "DeadlineExceeded",
            StatusCode::NotFound => "NotFound",
            StatusCode::AlreadyExists => "AlreadyExists",
            StatusCode::PermissionDenied => "PermissionDenied",
            StatusCode::ResourceExhausted => "ResourceExhausted",
            StatusCode::FailedPrecondition => "FailedPrecondition",
            StatusCode::Aborted => "Aborted",
            StatusCode::OutOfRange => "OutOfRange",
            StatusCode::Unimplemented => "Unimplemented",
            StatusCode::Internal => "Internal",
            StatusCode::Unavailable => "Unavailable",
            StatusCode::DataLoss => "DataLoss",
            StatusCode::Unauthenticated => "Unauthenticated",
        }
    }

    /// Numeric wire value
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Map a numeric wire value back to a code; `None` outside 0..=16
    pub fn from_i32(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a raised fault into a recognized status code or "unclassified"
///
/// Implement this for the error type your RPC framework raises. Returning
/// `None` marks the fault as unclassified: the call is still closed and
/// counted, but the error counter is left alone (unless an explicit
/// unclassified label is configured).
pub trait Classify {
    fn status_code(&self) -> Option<StatusCode>;
}

/// `OK` is not a failure code, so it classifies as unclassified
impl Classify for StatusCode {
    fn status_code(&self) -> Option<StatusCode> {
        (*self != StatusCode::Ok).then_some(*self)
    }
}

impl Classify for std::convert::Infallible {
    fn status_code(&self) -> Option<StatusCode> {
        match *self {}
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn status_code(&self) -> Option<StatusCode> {
        (**self).status_code()
    }
}

impl<T: Classify + ?Sized> Classify for &T {
    fn status_code(&self) -> Option<StatusCode> {
        (**self).status_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_labels_match_framework_names() {
        assert_eq!(StatusCode::Ok.as_str(), "OK");
        assert_eq!(StatusCode::NotFound.as_str(), "NotFound");
        assert_eq!(StatusCode::DeadlineExceeded.as_str(), "DeadlineExceeded");
        assert_eq!(StatusCode::Unauthenticated.to_string(), "Unauthenticated");
    }

    #[test]
    fn test_from_i32_round_trips_every_code() {
        for (idx, code) in StatusCode::ALL.iter().enumerate() {
            assert_eq!(code.as_i32(), idx as i32);
            assert_eq!(StatusCode::from_i32(idx as i32), Some(*code));
        }
    }

    #[test]
    fn test_from_i32_rejects_out_of_range() {
        assert_eq!(StatusCode::from_i32(-1), None);
        assert_eq!(StatusCode::from_i32(17), None);
        assert_eq!(StatusCode::from_i32(i32::MAX), None);
    }

    #[test]
    fn test_ok_is_never_a_classified_code() {
        assert_eq!(StatusCode::Ok.status_code(), None);
        assert_eq!(
            StatusCode::Cancelled.status_code(),
            Some(StatusCode::Cancelled)
        );
    }

    #[test]
    fn test_classify_through_box_and_ref() {
        let boxed: Box<StatusCode> = Box::new(StatusCode::Aborted);
        assert_eq!(boxed.status_code(), Some(StatusCode::Aborted));
        let by_ref = &StatusCode::Internal;
        assert_eq!(Classify::status_code(&by_ref), Some(StatusCode::Internal));
    }
}
