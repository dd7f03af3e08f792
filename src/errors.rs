use std::error::Error;
use std::fmt;
use std::io::{self, ErrorKind};

use http::StatusCode;

use crate::conditional::DenyReason;
use crate::ifheader::IfHeaderError;
use crate::store::StoreError;

#[derive(Debug)]
pub enum DavError {
    /// The resource is locked and no matching lock token was submitted.
    Locked,
    /// A LOCK request conflicts with an existing lock.
    AlreadyLocked,
    /// None of the `If` header conditions matched.
    PreconditionFailed,
    /// The `If` header could not be parsed.
    MalformedIfHeader(IfHeaderError),
    XmlParseError,
    InvalidPath,
    UnknownDavMethod,
    Status(StatusCode),
    StatusClose(StatusCode),
    StoreError(StoreError),
    IoError(io::Error),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::MalformedIfHeader(e) => Some(e),
            DavError::StoreError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DavError::Locked => write!(f, "resource is locked"),
            DavError::AlreadyLocked => write!(f, "conflicting lock exists"),
            DavError::PreconditionFailed => write!(f, "precondition failed"),
            DavError::MalformedIfHeader(e) => write!(f, "malformed If header: {e}"),
            DavError::XmlParseError => write!(f, "XML parse error"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::UnknownDavMethod => write!(f, "unknown DAV method"),
            DavError::Status(_) | DavError::StatusClose(_) => {
                write!(f, "status {}", self.statuscode())
            }
            DavError::StoreError(e) => write!(f, "store error: {e}"),
            DavError::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<StoreError> for DavError {
    fn from(e: StoreError) -> Self {
        DavError::StoreError(e)
    }
}

impl From<IfHeaderError> for DavError {
    fn from(e: IfHeaderError) -> Self {
        DavError::MalformedIfHeader(e)
    }
}

impl From<DenyReason> for DavError {
    fn from(r: DenyReason) -> Self {
        match r {
            DenyReason::Locked => DavError::Locked,
            DenyReason::PreconditionFailed => DavError::PreconditionFailed,
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

fn storeerror_to_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        StoreError::Conflict => StatusCode::CONFLICT,
        StoreError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl DavError {
    /// HTTP status code this error is reported with.
    pub fn statuscode(&self) -> StatusCode {
        match self {
            DavError::Locked | DavError::AlreadyLocked => StatusCode::LOCKED,
            // a conditional we cannot understand is treated as one that failed.
            DavError::PreconditionFailed | DavError::MalformedIfHeader(_) => {
                StatusCode::PRECONDITION_FAILED
            }
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::StoreError(e) => storeerror_to_status(e),
            DavError::IoError(e) => ioerror_to_status(e),
        }
    }

    /// Whether the connection should be closed after sending the error.
    pub fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_)
                | &DavError::Locked
                | &DavError::AlreadyLocked
                | &DavError::PreconditionFailed
                | &DavError::MalformedIfHeader(_)
                | &DavError::StoreError(StoreError::NotFound)
        )
    }
}

pub type DavResult<T> = Result<T, DavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_status() {
        assert_eq!(
            DavError::from(DenyReason::Locked).statuscode(),
            StatusCode::LOCKED
        );
        assert_eq!(
            DavError::from(DenyReason::PreconditionFailed).statuscode(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(DavError::AlreadyLocked.statuscode(), StatusCode::LOCKED);
        assert!(!DavError::Locked.must_close());
    }

    #[test]
    fn test_malformed_header_is_412() {
        let e = DavError::from(IfHeaderError::DanglingNot { offset: 4 });
        assert_eq!(e.statuscode(), StatusCode::PRECONDITION_FAILED);
        assert!(e.source().is_some());
    }
}
