//! Block Feed Module
//!
//! Publication channel for committed blocks. The coordinator writes each
//! committed block once; any number of readers consume them at their own pace.

mod channel;
pub use channel::{BlockFeed, BlockReader};
