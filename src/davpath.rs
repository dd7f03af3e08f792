//! Utility module to handle the path part of an URL as a resource path.
//!
use std::fmt;

use percent_encoding::percent_decode_str;

use crate::errors::DavError;
use crate::DavResult;

/// Path of a resource, relative to the configured prefix, percent-decoded
/// and split into segments.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    segments: Vec<String>,
    collection: bool,
}

impl DavPath {
    /// Parse a (percent-encoded) absolute path such as `/a/b%20c/`.
    pub fn new(path: &str) -> DavResult<DavPath> {
        if !path.starts_with('/') {
            return Err(DavError::InvalidPath);
        }
        let mut segments: Vec<String> = Vec::new();
        for seg in path.split('/') {
            let seg = percent_decode_str(seg)
                .decode_utf8()
                .map_err(|_| DavError::InvalidPath)?;
            match seg.as_ref() {
                "" | "." => {}
                ".." => {
                    segments.pop().ok_or(DavError::InvalidPath)?;
                }
                s if s.contains('\0') || s.contains('/') => return Err(DavError::InvalidPath),
                s => segments.push(s.to_string()),
            }
        }
        Ok(DavPath {
            collection: path.ends_with('/') || segments.is_empty(),
            segments,
        })
    }

    /// From the request URI, with `prefix` stripped off.
    pub fn from_uri_and_prefix(uri: &http::Uri, prefix: &str) -> DavResult<DavPath> {
        DavPath::new(strip_prefix(uri.path(), prefix)?)
    }

    /// From an URL as found in a header (`If` resource tags). This can
    /// be an absolute URL or just an absolute path.
    pub fn from_url_and_prefix(url: &str, prefix: &str) -> DavResult<DavPath> {
        if url.starts_with('/') {
            return DavPath::new(strip_prefix(url, prefix)?);
        }
        let url = url::Url::parse(url).map_err(|_| DavError::InvalidPath)?;
        DavPath::new(strip_prefix(url.path(), prefix)?)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Does the path end in a slash.
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// The containing collection, `None` for the root.
    pub fn parent(&self) -> Option<DavPath> {
        let (_, segments) = self.segments.split_last()?;
        Some(DavPath {
            segments: segments.to_vec(),
            collection: true,
        })
    }
}

fn strip_prefix<'a>(path: &'a str, prefix: &str) -> DavResult<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Ok(path);
    }
    match path.strip_prefix(prefix) {
        Some("") => Ok("/"),
        Some(rest) if rest.starts_with('/') => Ok(rest),
        _ => Err(DavError::InvalidPath),
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for seg in &self.segments {
            write!(f, "/{seg}")?;
        }
        if self.segments.is_empty() || self.collection {
            f.write_str("/")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_davpath() {
        let p = DavPath::new("/a/b%20c/./d/../e").unwrap();
        assert_eq!(p.segments(), &["a", "b c", "e"]);
        assert!(!p.is_collection());
        assert_eq!(p.to_string(), "/a/b c/e");
        assert_eq!(p.parent().unwrap().to_string(), "/a/b c/");

        let root = DavPath::new("/").unwrap();
        assert!(root.is_root());
        assert!(root.parent().is_none());
        assert_eq!(root.to_string(), "/");

        assert!(DavPath::new("a/b").is_err());
        assert!(DavPath::new("/..").is_err());
        assert!(DavPath::new("/a%2fb").is_err());
    }

    #[test]
    fn test_prefix() {
        let uri: http::Uri = "http://localhost/dav/x/y".parse().unwrap();
        let p = DavPath::from_uri_and_prefix(&uri, "/dav/").unwrap();
        assert_eq!(p.segments(), &["x", "y"]);

        let uri: http::Uri = "/davx/y".parse().unwrap();
        assert!(DavPath::from_uri_and_prefix(&uri, "/dav").is_err());

        let p = DavPath::from_url_and_prefix("http://example.com/dav/x/", "/dav").unwrap();
        assert_eq!(p.segments(), &["x"]);
        assert!(p.is_collection());
        let p = DavPath::from_url_and_prefix("/dav", "/dav").unwrap();
        assert!(p.is_root());
        assert!(DavPath::from_url_and_prefix("not a url", "").is_err());
    }
}
