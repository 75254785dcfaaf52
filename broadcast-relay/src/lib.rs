//! Broadcast relay: every byte one client sends is forwarded, unmodified, to
//! every other connected client.
//!
//! There is no message framing; one read of up to 256 bytes is relayed as one
//! unit. After a full idle window with no activity anywhere, each client gets a
//! fixed heartbeat line. Each module focuses on a concrete responsibility:
//!
//! - [`config`] holds the relay settings and the fixed constants.
//! - [`cli`] maps command-line flags onto a [`config::RelayConfig`].
//! - [`listener`] binds the listening socket and sets keepalive on accepted
//!   connections.
//! - [`registry`] tracks open connections and fans payloads out to them.
//! - [`heartbeat`] sends the idle probe.
//! - [`relay`] runs the control loop tying the pieces together.
//! - [`discovery`] is the seam through which the relay announces itself.
//! - [`error`] lists the fatal errors.
//!
//! Integration tests drive the relay over loopback TCP.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod heartbeat;
pub mod listener;
pub mod registry;
pub mod relay;

pub use relay::Relay;
