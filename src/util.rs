use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use http::method::InvalidMethod;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::errors::DavError;
use crate::DavResult;

bitflags! {
    /// Set of WebDAV methods, used to configure which methods the
    /// handler accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const PATCH = 0x0008;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
        const LOCKING = Self::LOCK.bits() | Self::UNLOCK.bits();
    }
}

impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();

    /// Does this method change state, and so have to pass the lock checks.
    pub fn is_mutating(self) -> bool {
        !Self::WEBDAV_RO.contains(self)
    }
}

// translate method into our own enum that has webdav methods as well.
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::PATCH => DavMethod::PATCH,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PROPFIND,
            "PROPPATCH" => DavMethod::PROPPATCH,
            "MKCOL" => DavMethod::MKCOL,
            "COPY" => DavMethod::COPY,
            "MOVE" => DavMethod::MOVE,
            "LOCK" => DavMethod::LOCK,
            "UNLOCK" => DavMethod::UNLOCK,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| {
            // there is no public constructor for InvalidMethod.
            match http::method::Method::from_bytes(b"") {
                Err(e) => e,
                Ok(_) => unreachable!("empty method name is invalid"),
            }
        })
    }
}

pub fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    let secs = match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    };
    time::OffsetDateTime::from_unix_timestamp(secs)
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset!(UTC))
}

/// Formats a lock expiry time for log output.
pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid time".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;
    use std::time::Duration;

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
        let t = UNIX_EPOCH + Duration::from_secs(851013597);
        assert_eq!(systemtime_to_rfc3339(t), "1996-12-19T16:39:57Z");
    }

    #[test]
    fn test_dav_method() {
        let lock = http::Method::from_bytes(b"LOCK").unwrap();
        assert_eq!(dav_method(&lock).unwrap(), DavMethod::LOCK);
        assert!(DavMethod::LOCK.is_mutating());
        assert!(!DavMethod::PROPFIND.is_mutating());
        let bogus = http::Method::from_bytes(b"BREW").unwrap();
        assert!(matches!(dav_method(&bogus), Err(DavError::UnknownDavMethod)));
        assert!(DavMethod::try_from(&bogus).is_err());
    }
}
