//! mediacache library
//!
//! A bounded local cache for adaptive-streaming media responses. Requests go
//! through [`policy::Interceptor`]; [`worker::CacheWorker`] wires the store,
//! size governor and control channel together.

pub mod cache;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod fetch;
pub mod governor;
pub mod invalidate;
pub mod logging;
pub mod policy;
pub mod worker;

pub use cache::{CacheSource, Intercepted, Response};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult, FetchError};
pub use worker::CacheWorker;
