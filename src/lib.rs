//! Client-side data synchronization core for a hosted social backend.
//!
//! The backend is a hosted platform exposing an identity service, a document
//! store, and an object store. This crate provides the layer between an
//! application UI and that platform:
//!
//! - [`platform`] — ports for the three external services, with an HTTP
//!   implementation and an in-memory one for tests and offline development.
//! - [`api`] — typed resource operations (users, posts, comments, saves),
//!   including the two-phase image upload with compensating cleanup.
//! - [`cache`] — query cache with explicit invalidation, request coalescing,
//!   and subscriber notification.
//! - [`mutation`] — runs a write and invalidates dependent cache keys on
//!   success.
//! - [`sync`] — the cached client wiring queries and mutations together.
//! - [`pager`] — page-cursor state for infinite post feeds.
//! - [`session`] — authentication gate holding the current identity.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod mutation;
pub mod pager;
pub mod platform;
pub mod session;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
