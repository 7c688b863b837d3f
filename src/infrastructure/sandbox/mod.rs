//! Sandboxed test execution
//!
//! - Docker mode: `docker run --rm` with the checkout mounted at `/app`
//! - Local mode: the same command in its own process group
//! - Log cleanup: ANSI escapes and installer banners removed

pub mod normalize;
pub mod runner;

pub use normalize::clean_log;
pub use runner::{ProcessSandbox, TIMEOUT_EXIT_CODE, TIMEOUT_MARKER};
