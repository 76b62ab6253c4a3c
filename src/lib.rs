//! Incremental regeneration cache server.
//!
//! The [`cache`] module is usable on its own with any [`cache::Renderer`];
//! the remaining modules wire it to an HTTP origin and expose it over HTTP.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
