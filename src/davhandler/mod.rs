//
// This module contains the main entry point of the library,
// DavLockHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::buf::Buf;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::conditional;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::ifheader::{self, IfHeader, IfHeaderError};
use crate::ls::{Caller, LockMutator, LockRegistry};
use crate::store::{DavResourceStore, ResourceId, StoreError, StoreTxn};
use crate::util::{dav_method, DavMethod};
use crate::DavResult;

pub mod handle_lock;

// LOCK bodies are small, anything bigger is refused.
const MAX_BODY_SIZE: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavLockBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Resource store backend.
    store: Arc<dyn DavResourceStore>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethod,
    /// Principal is webdav speak for "user", used to give locks an owner.
    principal: Option<String>,
    /// Upper limit for lock timeouts. `None` allows infinite locks.
    max_timeout: Option<Duration>,
    /// How far up the tree to look for inherited locks.
    max_lock_depth: usize,
}

impl DavLockBuilder {
    /// Create a new configuration builder.
    pub fn new(store: Arc<dyn DavResourceStore>) -> DavLockBuilder {
        Self {
            prefix: String::new(),
            store,
            allow: DavMethod::all(),
            principal: None,
            max_timeout: None,
            max_lock_depth: crate::ls::registry::DEFAULT_MAX_LOCK_DEPTH,
        }
    }

    /// Use the configuration that was built to generate a DavLockHandler.
    pub fn build(self) -> DavLockHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a resource path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethod) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Clamp requested lock timeouts, and replace "Infinite".
    pub fn max_timeout(self, max: Duration) -> Self {
        let mut this = self;
        this.max_timeout = Some(max);
        this
    }

    /// Bound for the ancestor walk. Deeper trees read as locked.
    pub fn max_lock_depth(self, depth: usize) -> Self {
        let mut this = self;
        this.max_lock_depth = depth;
        this
    }
}

/// The webdav lock handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
///
/// `handle` and `handle_with` serve LOCK and UNLOCK requests. `guard`
/// runs the lock checks for any other mutating request.
#[derive(Clone)]
pub struct DavLockHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) store: Arc<dyn DavResourceStore>,
    pub(crate) allow: DavMethod,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) max_timeout: Option<Duration>,
    pub(crate) mutator: LockMutator,
}

impl From<DavLockBuilder> for DavLockHandler {
    fn from(cfg: DavLockBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            store: cfg.store,
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
            max_timeout: cfg.max_timeout,
            mutator: LockMutator::new(LockRegistry::new(cfg.max_lock_depth)),
        }
    }
}

impl DavLockHandler {
    /// Return a configuration builder.
    pub fn builder(store: Arc<dyn DavResourceStore>) -> DavLockBuilder {
        DavLockBuilder::new(store)
    }

    /// Handle a LOCK or UNLOCK request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a LOCK or UNLOCK request on behalf of `principal`.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }

    /// Run the lock checks for a mutating request and, if they pass,
    /// `op` in the same store transaction.
    ///
    /// `op` gets the open transaction and the id of the target, or `None`
    /// if it does not exist yet; the checks were then done against the
    /// parent collection. The transaction is committed only if `op`
    /// returns `Ok`.
    pub fn guard<B, T, F>(&self, req: &Request<B>, op: F) -> DavResult<T>
    where
        F: FnOnce(&mut dyn StoreTxn, Option<ResourceId>) -> DavResult<T>,
    {
        let method = self.allowed_method(req)?;
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;
        let ifh = if_header(req)?;
        let caller = self.caller();

        let mut txn = self.store.begin()?;
        let target = match txn.lookup(&path) {
            Ok(id) => Some(id),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        if method.is_mutating() {
            debug!("guard {:?} {}", method, path);
            let registry = self.mutator.registry();
            let (id, etag) = match target {
                Some(id) => (id, Some(txn.etag(id)?)),
                None => {
                    let parent = path.parent().ok_or(StoreError::Conflict)?;
                    let id = txn.lookup(&parent).map_err(|_| StoreError::Conflict)?;
                    (id, None)
                }
            };
            let info = registry.resolve(&*txn, id, &caller);
            let conditions = ifh.conditions();
            let ignore_shared = method == DavMethod::PROPPATCH;
            conditional::check_lock_token(&info, conditions, ignore_shared, false)?;

            match self.tagged_resource(&*txn, &ifh, &path)? {
                Some(other) => {
                    let info = registry.resolve(&*txn, other, &caller);
                    let etag = txn.etag(other)?;
                    conditional::check_conditions(&info, conditions, Some(&etag))?;
                }
                None => conditional::check_conditions(&info, conditions, etag.as_deref())?,
            }
        }

        let res = op(&mut *txn, target)?;
        txn.commit()?;
        Ok(res)
    }

    // The resource named by the If header's resource tag, when it is
    // not the request target itself.
    fn tagged_resource(
        &self,
        txn: &dyn StoreTxn,
        ifh: &IfHeader,
        target: &DavPath,
    ) -> DavResult<Option<ResourceId>> {
        let tag = match &ifh.resource_tag {
            Some(tag) => tag,
            None => return Ok(None),
        };
        let path = match DavPath::from_url_and_prefix(tag, &self.prefix) {
            Ok(p) => p,
            Err(_) => {
                debug!("If: resource tag {tag} is outside of {}", self.prefix);
                return Err(DavError::PreconditionFailed);
            }
        };
        if path.segments() == target.segments() {
            return Ok(None);
        }
        match txn.lookup(&path) {
            Ok(id) => Ok(Some(id)),
            Err(StoreError::NotFound) => {
                debug!("If: resource tag {path} does not exist");
                Err(DavError::PreconditionFailed)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn caller(&self) -> Caller {
        Caller::new(self.principal.as_ref().map(|p| p.to_string()))
    }

    fn allowed_method<B>(&self, req: &Request<B>) -> DavResult<DavMethod> {
        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }
        Ok(method)
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = err.statuscode();
                let h = resp.headers_mut();
                h.insert(http::header::CONTENT_LENGTH, http::HeaderValue::from_static("0"));
                if err.must_close() {
                    h.insert(http::header::CONNECTION, http::HeaderValue::from_static("close"));
                }
                resp
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        let method = self.allowed_method(&req)?;
        if !DavMethod::LOCKING.contains(method) {
            debug!("{} is not handled here", req.method());
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        let body_data = self.read_request(body, MAX_BODY_SIZE).await?;
        if method == DavMethod::UNLOCK && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        if method == DavMethod::LOCK {
            self.handle_lock(&req, &path, &body_data)
        } else {
            self.handle_unlock(&req, &path)
        }
    }
}

// Parse the If: header. No header means no conditions.
pub(crate) fn if_header<B>(req: &Request<B>) -> DavResult<IfHeader> {
    match req.headers().get(&*davheaders::IF) {
        None => Ok(IfHeader::default()),
        Some(v) => {
            let s = v.to_str().map_err(|_| IfHeaderError::Unexpected {
                offset: 0,
                found: char::REPLACEMENT_CHARACTER,
            })?;
            let ifh = ifheader::parse(s)?;
            trace!("If: {:?}", ifh);
            Ok(ifh)
        }
    }
}
