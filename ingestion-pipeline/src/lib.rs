#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod blob_key;
pub mod character_merge;
pub mod dispatch;
pub mod enqueue;
pub mod extractor;
pub mod model_client;
pub mod pipeline;
pub mod prompts;
pub mod schema;

pub use dispatch::{recover_stale_leases, Dispatcher};
pub use enqueue::{EnqueueFilters, EnqueueStats};
pub use pipeline::SegmentProcessor;
