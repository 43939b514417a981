//! # portalsync
//!
//! Client-side sync engine for Stalker-style IPTV middleware portals.
//!
//! ## Architecture
//!
//! ```text
//! PortalSession → Catalog → ContentCache ← ContentIndexer
//!                              ↑
//!                        HybridFetcher → CLI
//! ```
//!
//! - [`fetcher`]: portal handshake, authenticated requests, paging
//! - [`store`]: merge-on-write content cache with on-disk snapshot
//! - [`indexer`]: background crawl of every configured category
//! - [`hybrid`]: cache-first reads topped up with a live fetch
//! - [`images`]: poster/logo download and decode cache
//!
//! ## Quick Start
//!
//! ```bash
//! portalsync login
//! portalsync categories
//! portalsync index
//! portalsync browse 5
//! portalsync watch --interval 6h
//! ```

/// Application context and error handling.
///
/// [`AppContext`](app::AppContext) owns the session, caches and indexer.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/portalsync/config.toml`.
pub mod config;

/// Content records, categories, device identity and state enums.
pub mod domain;

/// Portal transport.
///
/// - [`PortalSession`](fetcher::PortalSession): handshake and authenticated requests
/// - [`Catalog`](fetcher::Catalog): listing, paging, search and detail calls
/// - [`ConcurrencyLimiter`](fetcher::ConcurrencyLimiter) and
///   [`SingleFlight`](fetcher::SingleFlight): shared concurrency primitives
pub mod fetcher;

pub mod hybrid;

pub mod images;

/// Full-catalog indexer with smart sync.
pub mod indexer;

/// In-memory cache, snapshot persistence and run metadata.
pub mod store;

/// Periodic sync loop.
pub mod watch;
