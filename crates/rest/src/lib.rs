//! Protocol layer of the ARC CE REST client.
//!
//! Turns the port-level [`ce::Transport`] into typed CE operations:
//!
//! - [`Negotiator`] discovers the API versions a CE speaks and binds a
//!   [`ProtocolClient`] to the best one.
//! - [`ProtocolClient`] exposes job listing, submission, management, session
//!   file access, and delegation endpoints with version differences
//!   normalized away.
//! - [`DelegationManager`] drives the two-step delegation lifecycle and rolls
//!   back half-created delegations.
//!
//! ## Architectural Layer
//!
//! **Protocol.** No sockets or TLS here; every request goes through the
//! transport port. Test fakes of the ports live in [`testing`] behind the
//! `test-support` feature.

mod client;
mod delegation;
mod info;
mod negotiate;
mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use client::{ItemResult, JobAction, ProtocolClient, DEFAULT_API_BASE};
pub use delegation::{DelegationCredential, DelegationManager};
pub use info::parse_job_info;
pub use negotiate::{select_version, Negotiator};
