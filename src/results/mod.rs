//! Persistence of task results.

pub mod jsonl;
pub mod media;
pub mod store;
pub mod types;

pub use jsonl::{add_jsonl, format_json, read_jsonl};
pub use media::{extract_media, PendingMedia};
pub use store::ResultStore;
pub use types::TaskResult;
