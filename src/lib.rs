//! ## WebDAV gateway for a catalog-backed object store
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! This library maps those methods onto a remote object store: a namespace of
//! collections and data objects kept in a catalog, reached through a
//! [session][StoreSession] that makes one blocking call at a time.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes it in some
//! way, and then generates a `http::Response`. [`DavHandler`] is such a handler. It
//! works with the standard http types from the `http` and `http_body` crates, so it
//! can be used straight away with hyper, and with warp through the
//! [warp-compat][crate::warp] module.
//!
//! ## What happens to a request.
//!
//! - the request path, minus the mount location, is translated to a store path
//!   below the exposed root (a fixed path, the zone, `/zone/home`, or the user's
//!   home collection).
//! - the store object is looked up once; its stat is cached on the resource.
//! - the method is carried out by the [repository][DavRepository]. Store calls are
//!   blocking and run on the tokio blocking pool.
//!
//! Uploads are buffered into large writes, and content that replaces an existing
//! data object is first written to a temporary sibling that is renamed into place
//! on success. A failed upload leaves the old content alone.
//!
//! ## Backends.
//!
//! You supply a [`SessionProvider`] that hands out authenticated store sessions.
//! Included is [`StaticSession`], which serves every request from one session, and
//! [`MemStore`], an in-memory store for tests and experiments (feature `memstore`).
//!
//! ## Example.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use storedav::{DavHandler, MemStore, StaticSession};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!     let store = Arc::new(MemStore::new("tempZone", "rods"));
//!
//!     let dav_server = DavHandler::builder(StaticSession::new(store))
//!         .strip_prefix("/dav")
//!         .build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod davhandler;
mod errors;
mod util;

pub mod body;
pub mod davpath;
pub mod listing;
pub mod locks;
pub mod repo;
pub mod session;
pub mod store;

#[cfg(any(docsrs, feature = "warp-compat"))]
#[cfg_attr(docsrs, doc(cfg(feature = "warp-compat")))]
pub mod warp;

pub use crate::davhandler::{DavBuilder, DavHandler};
pub use crate::errors::{DavError, DavResult};
pub use crate::listing::{BasicListing, ListingEntry, ListingRenderer};
pub use crate::locks::{DavLockRegistry, MemLockRegistry};
pub use crate::repo::path::ExposedRoot;
pub use crate::repo::{DavRepository, ProviderConfig, StoreRepository};
pub use crate::session::{SessionProvider, StaticSession};
pub use crate::store::{StoreEnv, StoreError, StoreSession};
pub use crate::util::{DavMethod, DavMethodSet};

#[cfg(any(docsrs, feature = "memstore"))]
pub use crate::store::memstore::MemStore;
