//! ## WebDAV lock handling and `If` header authorization
//!
//! [`Webdav`] (RFC4918) adds write locks to HTTP. A client takes a lock
//! on a resource with LOCK, gets an opaque lock token back, and has to
//! present that token in the `If` header of every request that changes
//! the locked resource. Locks can be exclusive or shared, and a lock with
//! depth "infinity" on a collection covers everything below it.
//!
//! This library is the part of a WebDAV server that decides whether a
//! request may go ahead:
//!
//! - [`ifheader`] parses the `If` header into a list of conditions.
//! - [`LockRegistry`] works out which lock applies to a resource, walking
//!   up the tree for inherited locks.
//! - [`conditional`] combines the two. First it checks that a token held by
//!   the lock was submitted (423 Locked otherwise), then that at least one
//!   condition is true (412 Precondition Failed otherwise).
//! - [`LockMutator`] takes, refreshes and releases locks.
//!
//! ## Backend interface.
//!
//! You supply a [resource store][DavResourceStore] that holds the tree and
//! the lock properties of every resource. Each request runs in one store
//! transaction, so the check and the update that follows it are atomic.
//! An in-memory store ([`MemStore`]) is included.
//!
//! ## Handler.
//!
//! [`DavLockHandler`] works with the standard http types from the `http`
//! and `http_body` crates. It serves LOCK and UNLOCK itself, and its
//! [`guard`][DavLockHandler::guard] method runs the lock checks for the
//! other methods of your server.
//!
//! ```no_run
//! use bytes::Bytes;
//! use dav_lockguard::{DavLockHandler, DavResult, MemStore};
//! use http_body::Full;
//!
//! # async fn serve(req: http::Request<Full<Bytes>>) -> DavResult<()> {
//! let store = MemStore::new();
//! let dav = DavLockHandler::builder(store)
//!     .strip_prefix("/dav")
//!     .principal("alice")
//!     .build();
//!
//! // LOCK and UNLOCK.
//! let _resp = dav.handle(req).await;
//!
//! // any other method that changes something.
//! # let req = http::Request::builder().method("PUT").uri("/dav/x").body(()).unwrap();
//! dav.guard(&req, |txn, id| {
//!     // store the new content here, then record the change.
//!     if let Some(id) = id {
//!         txn.touch(id)?;
//!     }
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [`MemStore`]: store::memstore::MemStore

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod davhandler;
mod davheaders;
mod errors;
mod tree;
mod util;

pub mod body;
pub mod conditional;
pub mod davpath;
pub mod ifheader;
pub mod ls;
pub mod store;

pub use crate::conditional::{authorize, DenyReason};
pub use crate::davhandler::{DavLockBuilder, DavLockHandler};
pub use crate::errors::{DavError, DavResult};
pub use crate::ls::{Caller, LockInfo, LockMutator, LockRegistry, LockState};
pub use crate::store::{DavResourceStore, StoreTxn};
pub use crate::util::DavMethod;

#[cfg(any(docsrs, feature = "memstore"))]
pub use crate::store::memstore::MemStore;
