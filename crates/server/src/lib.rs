//! Read-only registry HTTP projection for the pantry registry
//! mirror.
//!
//! The server reads only from the catalog and the tarball directory:
//! it serves documents with tarball URLs rewritten to itself,
//! resolves version selectors, and streams (or proxy-redirects)
//! tarball downloads.

pub mod error;
pub mod handlers;
pub mod rewrite;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use rewrite::rewrite_tarball_urls;
pub use routes::create_router;
pub use state::AppState;
