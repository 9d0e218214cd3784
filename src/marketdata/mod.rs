//! Market data: latest top-of-book per token, written by the feed adapter,
//! shared-read by strategies.

pub mod cache;
pub mod feed;

pub use cache::TobCache;
pub use feed::{TobFeed, TobFeedConfig};
