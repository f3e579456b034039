pub mod config;
pub mod error;
pub mod progress;
pub mod report;
pub mod types;
pub mod url;

pub use config::*;
pub use error::CrawlError;
pub use progress::{ProgressEvent, ProgressSink};
pub use report::*;
pub use types::*;
