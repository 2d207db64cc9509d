//! Streams the tail of growing log files to remote viewers.
//!
//! Each viewer holds one websocket and multiplexes a handful of request
//! kinds over it: hostname, ping, channel listing, and subscribing to one
//! log file ("channel") beneath a configured root. Subscribing replays at
//! most a configured number of bytes from the end of the file, then follows
//! it as it grows.
//!
//! The file follow is driven by [`notify`](https://crates.io/crates/notify)
//! and is usable on its own:
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use futures_util::stream::StreamExt;
//! use logcast::{FollowOptions, Follower, Location, TailFollower};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let options = FollowOptions {
//!         location: Location::FromEnd(5000),
//!         ..FollowOptions::default()
//!     };
//!     let mut lines = TailFollower.follow(Path::new("log/app.log"), options).await?;
//!
//!     while let Some(Ok(line)) = lines.next().await {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! The parent directory of a followed file must exist, since that is where
//! the watch is registered. This is what lets a rotated-away file be picked
//! up again once it is recreated.

pub mod config;
mod error;
mod events;
pub mod inventory;
pub mod protocol;
mod reader;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{Config, SessionConfig};
pub use error::{Error, Result};
pub use events::{FileEvent, FileEvents, WatchMode, POLL_INTERVAL};
pub use inventory::{FileRecord, Inventory};
pub use reader::{FollowOptions, Follower, LineStream, Location, SplitLines, Tail, TailFollower};
pub use session::{FollowSession, FollowSlot, Session};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
