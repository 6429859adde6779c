//! Port definitions (driven/secondary ports).
//!
//! The filesystem core talks to the outside world through two small
//! traits: [`HttpClient`] for the raw HTTP transport and [`AuthProvider`]
//! for the token lifecycle. Production adapters live in `nimbus-graph`;
//! tests substitute in-memory fakes that can inject status codes and
//! canned bodies.

pub mod auth;
pub mod http;

pub use auth::{AuthError, AuthProvider, StaticToken};
pub use http::{HttpClient, HttpResponse, Method, TransportError};
