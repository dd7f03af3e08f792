use std::time::Duration;

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::{Element, EmitterConfig, XMLNode};

use crate::body::Body;
use crate::davheaders::{self, DavTimeout};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::ls::{LockDepth, LockRequest, LockScope};
use crate::DavResult;

use super::{if_header, DavLockHandler};

const DAV_NS: &str = "DAV:";

// Find a child element in the DAV: namespace.
fn dav_child<'a>(elem: &'a Element, name: &str) -> Option<&'a Element> {
    elem.children.iter().find_map(|n| match n {
        XMLNode::Element(e) if e.name == name && e.namespace.as_deref() == Some(DAV_NS) => Some(e),
        _ => None,
    })
}

// The first child element, whatever it is.
fn first_element(elem: &Element) -> Option<&Element> {
    elem.children.iter().find_map(|n| match n {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

// Contents of <owner>, as XML text.
fn owner_string(owner: &Element) -> Option<String> {
    let config = EmitterConfig::new()
        .write_document_declaration(false)
        .perform_indent(false);
    let mut out = Vec::new();
    for node in &owner.children {
        match node {
            XMLNode::Element(e) => e.write_with_config(&mut out, config.clone()).ok()?,
            XMLNode::Text(t) => out.extend_from_slice(t.trim().as_bytes()),
            _ => {}
        }
    }
    let s = String::from_utf8(out).ok()?;
    (!s.is_empty()).then_some(s)
}

/// Parsed `<lockinfo>` body.
pub(crate) struct LockInfoBody {
    pub scope: LockScope,
    pub owner: Option<String>,
}

pub(crate) fn parse_lockinfo(body: &[u8]) -> DavResult<LockInfoBody> {
    let root = Element::parse(body).map_err(|_| DavError::XmlParseError)?;
    if root.name != "lockinfo" || root.namespace.as_deref() != Some(DAV_NS) {
        return Err(DavError::XmlParseError);
    }

    let scope = dav_child(&root, "lockscope")
        .and_then(first_element)
        .ok_or(DavError::XmlParseError)?;
    let scope = match scope.name.as_str() {
        "exclusive" => LockScope::Exclusive,
        "shared" => LockScope::Shared,
        _ => return Err(DavError::XmlParseError),
    };

    // write locks are the only kind there is.
    match dav_child(&root, "locktype").and_then(first_element) {
        Some(t) if t.name == "write" => {}
        _ => return Err(DavError::XmlParseError),
    }

    let owner = dav_child(&root, "owner").and_then(owner_string);
    Ok(LockInfoBody { scope, owner })
}

impl DavLockHandler {
    // Requested timeout, limited by max_timeout.
    fn timeout<B>(&self, req: &Request<B>) -> Option<Duration> {
        let requested = req
            .headers()
            .typed_get::<davheaders::Timeout>()
            .and_then(|t| t.0.first().copied())
            .unwrap_or(DavTimeout::Infinite)
            .duration();
        match (requested, self.max_timeout) {
            (Some(t), Some(max)) => Some(t.min(max)),
            (None, max) => max,
            (t, None) => t,
        }
    }

    pub(crate) fn handle_lock(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let ifh = if_header(req)?;
        let timeout = self.timeout(req);
        let caller = self.caller();

        // an empty body means refresh.
        if body.is_empty() {
            let mut txn = self.store.begin()?;
            let id = txn.lookup(path)?;
            let info = self
                .mutator
                .refresh(&mut *txn, id, ifh.conditions(), timeout, &caller)?;
            txn.commit()?;

            // shared participants never time out.
            let timeout = if info.is_shared() { None } else { timeout };
            let mut res = Response::new(Body::empty());
            res.headers_mut()
                .typed_insert(davheaders::Timeout(vec![DavTimeout::from_duration(timeout)]));
            return Ok(res);
        }

        let lockinfo = parse_lockinfo(body)?;
        let depth = match req.headers().typed_try_get::<davheaders::Depth>() {
            Ok(None) => LockDepth::Infinity,
            Ok(Some(d)) => d.lock_depth().ok_or(DavError::Status(StatusCode::BAD_REQUEST))?,
            Err(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };
        let lockreq = LockRequest {
            scope: lockinfo.scope,
            depth,
            owner: lockinfo.owner,
            // shared participants do not expire.
            timeout: match lockinfo.scope {
                LockScope::Exclusive => timeout,
                LockScope::Shared => None,
            },
        };

        let mut txn = self.store.begin()?;
        let id = txn.lookup(path)?;
        let etag = txn.etag(id)?;
        let token = self.mutator.acquire(
            &mut *txn,
            id,
            &lockreq,
            ifh.conditions(),
            Some(&etag),
            &caller,
        )?;
        txn.commit()?;

        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.typed_insert(davheaders::LockToken(token));
        h.typed_insert(davheaders::Timeout(vec![DavTimeout::from_duration(
            lockreq.timeout,
        )]));
        Ok(res)
    }

    pub(crate) fn handle_unlock(
        &self,
        req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        let token = match req.headers().typed_get::<davheaders::LockToken>() {
            Some(t) => t.0,
            None => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
        };
        let caller = self.caller();

        let mut txn = self.store.begin()?;
        let id = txn.lookup(path)?;
        self.mutator.release(&mut *txn, id, &token, &caller)?;
        txn.commit()?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use http_body::Full;

    use crate::ls::LockRegistry;
    use crate::store::memstore::MemStore;
    use crate::store::DavResourceStore;

    const EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:alice@example.com</D:href></D:owner>
</D:lockinfo>"#;

    const SHARED: &str = r#"<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

    fn setup() -> (Arc<MemStore>, DavLockHandler) {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = MemStore::new();
        store.create_collection(&DavPath::new("/a/").unwrap()).unwrap();
        store.create_resource(&DavPath::new("/a/b").unwrap()).unwrap();
        let dav = DavLockHandler::builder(store.clone())
            .principal("alice")
            .max_timeout(Duration::from_secs(3600))
            .build();
        (store, dav)
    }

    fn req(method: &str, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    async fn send(dav: &DavLockHandler, b: http::request::Builder, body: &str) -> Response<Body> {
        let req = b.body(Full::new(Bytes::from(body.to_string()))).unwrap();
        dav.handle(req).await
    }

    fn lock_token(res: &Response<Body>) -> String {
        res.headers()
            .typed_get::<davheaders::LockToken>()
            .unwrap()
            .0
    }

    fn resolve(store: &MemStore, path: &str) -> crate::ls::LockInfo {
        let txn = store.begin().unwrap();
        let id = txn.lookup(&DavPath::new(path).unwrap()).unwrap();
        LockRegistry::default().resolve(&*txn, id, &crate::ls::Caller::new(None))
    }

    #[test]
    fn test_parse_lockinfo() {
        let li = parse_lockinfo(EXCLUSIVE.as_bytes()).unwrap();
        assert_eq!(li.scope, LockScope::Exclusive);
        let owner = li.owner.unwrap();
        assert!(owner.contains("mailto:alice@example.com"), "{owner}");

        let li = parse_lockinfo(SHARED.as_bytes()).unwrap();
        assert_eq!(li.scope, LockScope::Shared);
        assert_eq!(li.owner, None);

        assert!(parse_lockinfo(b"<D:propfind xmlns:D=\"DAV:\"/>").is_err());
        assert!(parse_lockinfo(b"not xml").is_err());
        let bad_type = SHARED.replace("<D:write/>", "<D:read/>");
        assert!(parse_lockinfo(bad_type.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn test_lock_unlock() {
        let (store, dav) = setup();
        let res = send(&dav, req("LOCK", "/a/").header("Timeout", "Second-600"), EXCLUSIVE).await;
        assert_eq!(res.status(), StatusCode::OK);
        let token = lock_token(&res);
        assert_eq!(res.headers().get("timeout").unwrap(), "Second-600");
        assert_eq!(resolve(&store, "/a/b").token(), Some(token.as_str()));

        // locked, no token.
        let res = send(&dav, req("LOCK", "/a/b").header("Depth", "0"), EXCLUSIVE).await;
        assert_eq!(res.status(), StatusCode::LOCKED);

        // UNLOCK through a member of the locked collection.
        let res = send(
            &dav,
            req("UNLOCK", "/a/b").header("Lock-Token", format!("<{token}>")),
            "",
        )
        .await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(!resolve(&store, "/a/").is_locked());

        let res = send(
            &dav,
            req("UNLOCK", "/a/b").header("Lock-Token", format!("<{token}>")),
            "",
        )
        .await;
        assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_refresh() {
        let (_store, dav) = setup();
        // Infinite is capped by max_timeout.
        let res = send(&dav, req("LOCK", "/a/b").header("Timeout", "Infinite"), EXCLUSIVE).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("timeout").unwrap(), "Second-3600");
        let token = lock_token(&res);

        let res = send(
            &dav,
            req("LOCK", "/a/b")
                .header("If", format!("(<{token}>)"))
                .header("Timeout", "Second-60"),
            "",
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("timeout").unwrap(), "Second-60");

        let res = send(
            &dav,
            req("LOCK", "/a/b").header("If", "(<opaquelocktoken:wrong>)"),
            "",
        )
        .await;
        assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_shared_lock() {
        let (store, dav) = setup();
        let res = send(&dav, req("LOCK", "/a/b"), SHARED).await;
        assert_eq!(res.status(), StatusCode::OK);
        let t1 = lock_token(&res);
        assert_eq!(res.headers().get("timeout").unwrap(), "Infinite");

        let res = send(&dav, req("LOCK", "/a/b"), SHARED).await;
        assert_eq!(res.status(), StatusCode::LOCKED);
        let res = send(&dav, req("LOCK", "/a/b").header("If", "(Not <DAV:no-lock>)"), SHARED).await;
        assert_eq!(res.status(), StatusCode::LOCKED);
        assert_eq!(resolve(&store, "/a/b").shared_tokens, vec![t1.clone()]);

        let res = send(&dav, req("LOCK", "/a/b").header("If", format!("(<{t1}>)")), SHARED).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(resolve(&store, "/a/b").shared_tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_depth() {
        let (store, dav) = setup();
        for depth in ["2", "foo", ""] {
            let res = send(&dav, req("LOCK", "/a/").header("Depth", depth), EXCLUSIVE).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "depth {depth:?}");
        }
        assert!(!resolve(&store, "/a/").is_locked());
        assert!(!resolve(&store, "/a/b").is_locked());

        // absent means infinity.
        let res = send(&dav, req("LOCK", "/a/"), EXCLUSIVE).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(resolve(&store, "/a/b").depth, Some(LockDepth::Infinity));
    }

    #[tokio::test]
    async fn test_errors() {
        let (_store, dav) = setup();
        let res = send(&dav, req("LOCK", "/a/missing"), EXCLUSIVE).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = send(&dav, req("LOCK", "/a/").header("Depth", "1"), EXCLUSIVE).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = send(&dav, req("LOCK", "/a/b"), "<lockinfo/>").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = send(&dav, req("UNLOCK", "/a/b"), "").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = send(&dav, req("PUT", "/a/b"), "").await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers().get("connection").unwrap(), "close");

        let res = send(
            &dav,
            req("LOCK", "/a/b").header("If", "<tok Not"),
            EXCLUSIVE,
        )
        .await;
        assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);

        let big = "x".repeat(crate::davhandler::MAX_BODY_SIZE + 1);
        let res = send(&dav, req("LOCK", "/a/b"), &big).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
