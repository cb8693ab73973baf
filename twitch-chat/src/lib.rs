//! Client for the line-based chat that accompanies a live stream.
//!
//! [`ChatClient::connect`] logs in, joins the user's own channel and then hands
//! the socket to a background task that answers PINGs, collects chat messages
//! and rate-limits outgoing lines. A dropped connection is re-established with
//! exponential backoff.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod state;

pub use client::ChatClient;
pub use config::ChatConfig;
pub use error::{ChatError, ChatResult};
pub use protocol::{ChatMessage, ServerLine};
pub use state::ChatState;
