#![deny(missing_docs)]

//! Networking building blocks shared by every component of the mapping
//! pipeline: the process-wide pooled HTTPS client with its retry policy, and
//! a middleware that resolves `oci://` URLs against an OCI registry.

pub mod client;
mod oci_middleware;
pub mod retry_policies;

pub use client::{shared_client, ClientConfig};
pub use oci_middleware::OciMiddleware;
