//! Nimbus cache - durable content store and integrity hashing
//!
//! The [`store::ContentStore`] is the only durable holder of file bytes:
//! one embedded key-value database with a `content` namespace (inode id →
//! blob) and a `meta` namespace for the serialized metadata snapshot and
//! delta cursor.
//!
//! [`integrity`] provides the two hashes the server advertises for file
//! content - SHA-1 for personal drives, QuickXorHash for business drives -
//! used to decide whether a cached blob is still trustworthy on open.

pub mod integrity;
pub mod store;

pub use store::{ContentStore, StoreError};
