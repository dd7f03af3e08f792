//! Parser for the WebDAV `If` request header (RFC4918 section 10.4).
//!
//! The header is tokenized first into a small typed token stream
//! (resource tags, list brackets, state tokens, entity tags and `Not`),
//! and then folded into a list of [`Condition`]s. The lists are ORed,
//! the terms inside a list are ANDed.
//!
//! ```text
//! If: </a/b> (<opaquelocktoken:1234> ["etag"]) (Not <DAV:no-lock>)
//! ```
use std::error::Error;
use std::fmt;

/// Prefix every lock token that we hand out starts with.
pub const OPAQUE_LOCK_TOKEN: &str = "opaquelocktoken:";

/// One parenthesized list from the `If` header.
///
/// All populated fields must hold for the condition to be true.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Lock tokens that must equal the resource's lock token.
    pub lock_tokens_match: Vec<String>,
    /// Lock tokens that must not equal the resource's lock token.
    pub lock_tokens_not_match: Vec<String>,
    /// Entity tags that must equal the resource's etag. `None` is vacuously true.
    pub etags_match: Option<Vec<String>>,
    /// Entity tags that must not equal the resource's etag. `None` is vacuously true.
    pub etags_not_match: Option<Vec<String>>,
}

impl Condition {
    fn add_lock_token(&mut self, token: &str, not: bool) {
        if not {
            self.lock_tokens_not_match.push(token.to_string());
        } else {
            self.lock_tokens_match.push(token.to_string());
        }
    }

    fn add_etag(&mut self, etag: &str, not: bool) {
        let list = if not {
            &mut self.etags_not_match
        } else {
            &mut self.etags_match
        };
        list.get_or_insert_with(Vec::new).push(etag.to_string());
    }
}

/// A parsed `If` header.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IfHeader {
    /// Resource the conditions apply to (tagged-list form).
    pub resource_tag: Option<String>,
    /// The disjunction of conditions.
    pub conditions: Vec<Condition>,
}

impl IfHeader {
    /// The conditions, or `None` when there are no constraints at all.
    pub fn conditions(&self) -> Option<&[Condition]> {
        if self.conditions.is_empty() {
            None
        } else {
            Some(&self.conditions)
        }
    }

    /// All lock tokens that were submitted in a positive position.
    pub fn submitted_tokens(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .flat_map(|c| c.lock_tokens_match.iter().map(|t| t.as_str()))
    }
}

/// Reasons an `If` header is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfHeaderError {
    /// `Not` was not followed by a state token or entity tag.
    DanglingNot { offset: usize },
    /// A `<`, `[`, `"` or `(` was never closed.
    Unterminated { offset: usize, delim: char },
    /// A state token that is not an opaque lock token, in a positive position.
    BadStateToken { token: String },
    /// An entity tag that is not a quoted string.
    BadEntityTag { offset: usize },
    /// `()` without any terms.
    EmptyList { offset: usize },
    /// A resource tag that is not at the start of the header.
    MisplacedResourceTag { offset: usize },
    /// Anything else.
    Unexpected { offset: usize, found: char },
}

impl Error for IfHeaderError {}

impl fmt::Display for IfHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IfHeaderError::DanglingNot { offset } => {
                write!(f, "'Not' without a term at offset {offset}")
            }
            IfHeaderError::Unterminated { offset, delim } => {
                write!(f, "missing '{delim}' for token at offset {offset}")
            }
            IfHeaderError::BadStateToken { token } => {
                write!(f, "not an opaque lock token: {token}")
            }
            IfHeaderError::BadEntityTag { offset } => {
                write!(f, "bad entity tag at offset {offset}")
            }
            IfHeaderError::EmptyList { offset } => write!(f, "empty list at offset {offset}"),
            IfHeaderError::MisplacedResourceTag { offset } => {
                write!(f, "unexpected resource tag at offset {offset}")
            }
            IfHeaderError::Unexpected { offset, found } => {
                write!(f, "unexpected '{found}' at offset {offset}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IfToken<'a> {
    ResourceTag(&'a str),
    ListStart,
    ListEnd,
    StateToken(&'a str),
    EntityTag(&'a str),
    Not,
}

// A token plus the byte offset it started at.
type Spanned<'a> = (usize, IfToken<'a>);

fn tokenize(s: &str) -> Result<Vec<Spanned<'_>>, IfHeaderError> {
    let mut tokens = Vec::new();
    let mut in_list = false;
    let mut pos = 0;

    while let Some(c) = s[pos..].chars().next() {
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let rest = &s[pos..];
        let start = pos;
        match c {
            '(' if !in_list => {
                in_list = true;
                tokens.push((start, IfToken::ListStart));
                pos += 1;
            }
            ')' if in_list => {
                in_list = false;
                tokens.push((start, IfToken::ListEnd));
                pos += 1;
            }
            '<' => {
                let end = rest.find('>').ok_or(IfHeaderError::Unterminated {
                    offset: start,
                    delim: '>',
                })?;
                let inner = &rest[1..end];
                if in_list {
                    tokens.push((start, IfToken::StateToken(inner)));
                } else {
                    tokens.push((start, IfToken::ResourceTag(inner)));
                }
                pos += end + 1;
            }
            '[' if in_list => {
                let (tag, len) = entity_tag(rest, start)?;
                tokens.push((start, IfToken::EntityTag(tag)));
                pos += len;
            }
            'N' | 'n' if in_list && is_not_keyword(rest) => {
                tokens.push((start, IfToken::Not));
                pos += 3;
            }
            _ => return Err(IfHeaderError::Unexpected { offset: start, found: c }),
        }
    }

    if in_list {
        return Err(IfHeaderError::Unterminated {
            offset: s.len(),
            delim: ')',
        });
    }
    Ok(tokens)
}

// "Not" must be followed by whitespace or the start of the next term.
fn is_not_keyword(s: &str) -> bool {
    let kw = match s.get(..3) {
        Some(kw) => kw,
        None => return false,
    };
    kw.eq_ignore_ascii_case("not")
        && matches!(s[3..].chars().next(), None | Some(' ' | '\t' | '<' | '[' | ')'))
}

// Parses `["etag"]` or `[W/"etag"]`. Returns the tag without quotes and
// the number of bytes consumed. Weak tags compare like strong ones.
fn entity_tag(s: &str, offset: usize) -> Result<(&str, usize), IfHeaderError> {
    let body = &s[1..];
    let (body, skip) = match body.strip_prefix("W/") {
        Some(b) => (b, 3),
        None => (body, 1),
    };
    if !body.starts_with('"') {
        return match body.find(']') {
            Some(_) => Err(IfHeaderError::BadEntityTag { offset }),
            None => Err(IfHeaderError::Unterminated { offset, delim: ']' }),
        };
    }
    let close = body[1..].find('"').ok_or(IfHeaderError::Unterminated {
        offset,
        delim: '"',
    })? + 1;
    let tag = &body[1..close];
    if !body[close + 1..].starts_with(']') {
        return Err(IfHeaderError::Unterminated { offset, delim: ']' });
    }
    Ok((tag, skip + close + 2))
}

/// Parse the value of an `If` header.
///
/// An empty value gives an empty condition list, which means
/// "no constraints".
pub fn parse(raw: &str) -> Result<IfHeader, IfHeaderError> {
    let mut tokens = tokenize(raw)?.into_iter().peekable();
    let mut header = IfHeader::default();

    if let Some(&(_, IfToken::ResourceTag(tag))) = tokens.peek() {
        header.resource_tag = Some(tag.to_string());
        tokens.next();
    }

    while let Some((offset, token)) = tokens.next() {
        match token {
            IfToken::ListStart => {
                let cond = parse_list(offset, &mut tokens)?;
                header.conditions.push(cond);
            }
            IfToken::ResourceTag(_) => {
                return Err(IfHeaderError::MisplacedResourceTag { offset });
            }
            // the tokenizer only emits terms inside a list.
            _ => {
                return Err(IfHeaderError::Unexpected {
                    offset,
                    found: raw[offset..].chars().next().unwrap_or(' '),
                })
            }
        }
    }

    Ok(header)
}

fn parse_list<'a>(
    start: usize,
    tokens: &mut impl Iterator<Item = Spanned<'a>>,
) -> Result<Condition, IfHeaderError> {
    let mut cond = Condition::default();
    let mut not_at: Option<usize> = None;
    let mut terms = 0;

    loop {
        let (offset, token) = match tokens.next() {
            Some(t) => t,
            None => {
                return Err(IfHeaderError::Unterminated {
                    offset: start,
                    delim: ')',
                })
            }
        };
        match token {
            IfToken::Not => {
                if let Some(at) = not_at {
                    return Err(IfHeaderError::DanglingNot { offset: at });
                }
                not_at = Some(offset);
            }
            IfToken::StateToken(token) => {
                terms += 1;
                let not = not_at.take().is_some();
                if token.starts_with(OPAQUE_LOCK_TOKEN) {
                    cond.add_lock_token(token, not);
                } else if !not {
                    return Err(IfHeaderError::BadStateToken {
                        token: token.to_string(),
                    });
                } else {
                    // "Not <DAV:no-lock>" and friends: always true, nothing to record.
                    trace!("If: ignoring negated foreign state token {token}");
                }
            }
            IfToken::EntityTag(tag) => {
                terms += 1;
                let not = not_at.take().is_some();
                cond.add_etag(tag, not);
            }
            IfToken::ListEnd => {
                if let Some(at) = not_at {
                    return Err(IfHeaderError::DanglingNot { offset: at });
                }
                if terms == 0 {
                    return Err(IfHeaderError::EmptyList { offset: start });
                }
                return Ok(cond);
            }
            IfToken::ListStart | IfToken::ResourceTag(_) => {
                return Err(IfHeaderError::Unexpected {
                    offset,
                    found: '(',
                })
            }
        }
    }
}
