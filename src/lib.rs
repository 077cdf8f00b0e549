//! # hashlog - A Durable Hash-Indexed Append-Only Map
//!
//! hashlog is a persistent key-value map that stores every write as an
//! immutable record in an append-only log and finds records again through a
//! hash index. The log only ever grows; overwritten and removed entries are
//! reclaimed by compaction.
//!
//! ## Architecture
//!
//! The map is built from a few independent pieces:
//!
//! - **Append-only log** ([`appendlog`]): CRC-framed records addressed by their offset
//! - **Hash index** ([`index`]): maps a 32-bit key hash to candidate record ids
//! - **Descriptors** ([`descriptor`]): hashing, equality and codecs for keys and values
//! - **Map** ([`map`]): record codec, collision resolution, writes, recovery and compaction
//! - **Manifest** ([`manifest`]): names the live generation of a map directory
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use hashlog::{DurableMap, Options, StringDescriptor};
//!
//! # fn main() -> Result<(), hashlog::Error> {
//! // Open or create a map
//! let map = DurableMap::open("./data", StringDescriptor, StringDescriptor, Options::default())?;
//!
//! // Write operations
//! map.put(&"key1".to_string(), &"value1".to_string())?;
//! map.put(&"key2".to_string(), &"value2".to_string())?;
//!
//! // Read operations
//! if let Some(value) = map.get(&"key1".to_string())? {
//!     println!("Found: {}", value);
//! }
//!
//! // Delete operations
//! map.remove(&"key1".to_string())?;
//!
//! // Make everything durable
//! map.force()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod appendlog;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod manifest;
pub mod map;

// Re-exports
pub use appendlog::{AppendOnlyLog, FileLog};
pub use config::{Options, TombstonePolicy};
pub use descriptor::{BytesDescriptor, Descriptor, KnownSizeWriter, StringDescriptor, U64Descriptor};
pub use error::{Error, Result};
pub use index::{FileIndex, MultiIdIndex, NO_VALUE};
pub use map::{CompactionScore, DurableMap};
