//! Repository transports for Hoist.
//!
//! Implements [`artifacts::RepositoryTransport`] for the two kinds of
//! repository a [`artifacts::Repository`] can name:
//!
//! | Type | Reaches |
//! |------|---------|
//! | [`HttpTransport`] | `http://` and `https://` repositories, via `reqwest` |
//! | [`FileTransport`] | `file://` URLs and plain paths, via `tokio::fs` |
//! | [`RoutingTransport`] | either, dispatching on [`artifacts::RepositoryKind`] |
//!
//! Transports make exactly one attempt per call. Retries, checksum
//! verification and repository fallthrough belong to the engine's
//! downloader; this crate only maps each outcome onto a
//! [`artifacts::TransportError`] so the downloader can classify it.

mod file;
mod http;
mod routing;

pub use file::FileTransport;
pub use http::{HttpConfig, HttpTransport, TransportSetupError};
pub use routing::RoutingTransport;
