//! Shared building blocks for the post generation services.
//!
//! - [`clock`]: wall-clock abstraction so time-based state can be tested deterministically
//! - [`cache_manager`]: TTL + LRU in-memory cache with JSON export/import
//! - [`rate_limiting`]: per-source fixed-window admission control with burst credits

pub mod cache_manager;
pub mod clock;
pub mod rate_limiting;

pub use cache_manager::{CacheError, CacheExport, CacheManager, CacheStats, ExportedEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use rate_limiting::{RateLimitError, RateLimitStats, RateLimiter};
