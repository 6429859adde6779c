//! Nimbus graph - typed Microsoft Graph API operations
//!
//! Builds the drive item, quota, upload and delta operations the
//! filesystem needs on top of the raw [`nimbus_core::ports::HttpClient`]
//! transport port. The crate owns:
//! - the wire types ([`item`]) deserialized from Graph JSON,
//! - the authenticated request plumbing and endpoint construction
//!   ([`client`]),
//! - delta-feed pagination and coalescing ([`delta`]),
//! - error-body decoding ([`error`]),
//! - a `reqwest`-backed implementation of the transport port
//!   ([`transport`]).

pub mod client;
pub mod delta;
pub mod error;
pub mod item;
pub mod transport;

pub use client::{GraphClient, GRAPH_BASE_URL};
pub use error::GraphError;
