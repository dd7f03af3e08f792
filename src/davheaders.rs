use std::convert::TryFrom;
use std::fmt::Display;
use std::time::Duration;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

use crate::ls::LockDepth;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    pub static ref IF: HeaderName = HeaderName::from_static("if");
}

// helper: exactly one header value, as a str.
fn one<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(headers::Error::invalid)?;
    if values.next().is_some() {
        return Err(headers::Error::invalid());
    }
    v.to_str().map_err(|_| headers::Error::invalid())
}

fn value(s: impl Display) -> HeaderValue {
    // our own output is always valid ascii.
    HeaderValue::try_from(s.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    /// The depth of a lock. There is no such thing as a depth 1 lock.
    pub fn lock_depth(self) -> Option<LockDepth> {
        match self {
            Depth::Zero => Some(LockDepth::Zero),
            Depth::One => None,
            Depth::Infinity => Some(LockDepth::Infinity),
        }
    }
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            s if s.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "Infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// One entry of the Timeout: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u32),
    Infinite,
}

impl DavTimeout {
    /// `None` is infinite.
    pub fn duration(self) -> Option<Duration> {
        match self {
            DavTimeout::Seconds(n) => Some(Duration::from_secs(n as u64)),
            DavTimeout::Infinite => None,
        }
    }

    pub fn from_duration(d: Option<Duration>) -> DavTimeout {
        match d {
            Some(d) => DavTimeout::Seconds(d.as_secs().min(u32::MAX as u64) as u32),
            None => DavTimeout::Infinite,
        }
    }
}

/// Timeout: header. A list of preferences, the server picks one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| headers::Error::invalid())?;
            for word in value.split(',').map(str::trim).filter(|w| !w.is_empty()) {
                let t = if word.eq_ignore_ascii_case("infinite") {
                    DavTimeout::Infinite
                } else if word.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("second-")) {
                    // clients send silly large numbers, clamp them.
                    let n = word[7..]
                        .parse::<u64>()
                        .map_err(|_| headers::Error::invalid())?;
                    DavTimeout::Seconds(n.min(u32::MAX as u64) as u32)
                } else {
                    return Err(headers::Error::invalid());
                };
                v.push(t);
            }
        }
        if v.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let s = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{n}"),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        values.extend(std::iter::once(value(s)));
    }
}

/// Lock-Token: header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.trim();
        match s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            Some(t) if !t.is_empty() => Ok(LockToken(t.to_string())),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(std::iter::once(value(format!("<{}>", self.0))));
    }
}
