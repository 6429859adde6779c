//! Nimbus core - domain types and port definitions
//!
//! This crate contains the pieces shared by every other Nimbus crate:
//! - **Domain newtypes** - [`types::ItemId`], [`types::DriveType`],
//!   [`types::ContentHashes`]
//! - **Error taxonomy** - [`errors::FsError`] with its errno mapping
//! - **Configuration** - [`config::Config`] loaded from a YAML file
//! - **Port definitions** - traits implemented by adapters:
//!   [`ports::HttpClient`], [`ports::AuthProvider`]
//!
//! The crate deliberately knows nothing about HTTP libraries, FUSE or the
//! on-disk store; adapters live in `nimbus-graph`, `nimbus-cache` and
//! `nimbus-fuse`.

pub mod config;
pub mod errors;
pub mod ports;
pub mod types;
