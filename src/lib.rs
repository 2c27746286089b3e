//! # deepscan - search files everywhere they live
//!
//! Searches a local directory tree, every project of a GitLab group or every
//! repository of a GitHub organisation for files matching name, path and
//! content criteria, optionally decrypting SOPS secrets first.
//!
//! ## Quick Start
//!
//! ```bash
//! # files named .env containing a key, anywhere below the current directory
//! deepscan os search -n .env -c API_KEY
//!
//! # decrypted SOPS secrets of a GitLab group, written to output.json
//! deepscan gitlab search -o platform --sops-only --output json
//! ```

pub mod cli;
pub mod config;
pub mod git;
pub mod scanner;
pub mod sops;
pub mod storage;

pub use cli::{Cli, Output};
pub use config::DeepScanConfig;
pub use scanner::{FileMatch, LocalScanner, RemoteScanner, SearchOptions, Searcher};

/// Result type alias for deepscan operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
