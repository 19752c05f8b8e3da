//! cubeport-state: record store and image catalog for Cubeport.
//!
//! Backed by [redb](https://docs.rs/redb), holds the desired state of
//! workspaces, cubes (container specifications), and proxy routes. Live
//! container status is never persisted here.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by monotonically increasing `u64` ids drawn from a sequence table.
//! Every public operation runs inside a single redb transaction, so
//! existence checks, uniqueness checks and cascades commit atomically.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.
//!
//! The [`catalog`] module keeps the committed-image catalog as a single JSON
//! document next to the database.

pub mod catalog;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use catalog::{ImageCatalog, ImageListing, ImageRecord};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
