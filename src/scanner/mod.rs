//! Search engine: matcher, filter and the two traversal strategies

pub mod core;
pub mod filters;
pub mod local;
pub mod matcher;
pub mod remote;
pub mod types;

pub use self::core::{MatchObserver, MatchSink, ScanCore, ScanSettings};
pub use filters::{FilterOutcome, SearchFilter};
pub use local::LocalScanner;
pub use matcher::{MatchOutcome, MatchResult, SearchType, TextMatcher};
pub use remote::RemoteScanner;
pub use types::{File, FileMatch, FileType, SearchOptions, sort_matches};

use anyhow::Result;
use async_trait::async_trait;

/// Single entry point shared by every traversal backend
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Search from `start` (a directory or a group, depending on the backend).
    /// Only enumeration failures are returned as errors.
    async fn search(&self, start: &str, options: &SearchOptions) -> Result<Vec<FileMatch>>;
}
