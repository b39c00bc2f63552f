//! HTTPS transport adapter for the ARC CE REST client.
//!
//! Implements the [`ce::Transport`] and [`ce::Connector`] ports with
//! [`reqwest`] over rustls. The user's proxy certificate is the TLS client
//! identity; a bearer token, when configured, is sent on every request.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** No protocol knowledge lives here: requests arrive fully
//! formed and responses leave undecoded. The only policy is the single
//! transparent retry when the CE drops a kept-alive connection.

mod config;
mod https;
mod retry;

pub use config::TransportConfig;
pub use https::{HttpsConnector, HttpsTransport};
