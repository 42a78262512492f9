//! tumblr-mirror: incremental media mirror for Tumblr blogs
//!
//! A long-lived offline tool that downloads every photo and video referenced
//! by a set of blogs, resuming from persisted per-blog high-water marks:
//! - Paginated listing via the public API, with a session-authenticated
//!   fallback for blogs the public endpoint refuses
//! - One priority-fair semaphore bounding all network I/O, keyed by page
//!   offset so pagination keeps outrunning the download backlog
//! - Download path with URL-quality upgrade, header-driven filename
//!   correction, and atomic publish

pub mod auth;
pub mod config;
pub mod scrape;
pub mod store;

pub use config::Config;
