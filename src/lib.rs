#![warn(future_incompatible, let_underscore, nonstandard_style)]
#![allow(clippy::result_large_err)]

//! # robust-ws
//!
//! A logical WebSocket connection that survives the failure and replacement of its
//! underlying physical connection.
//!
//! This crate provides two layers, each usable on its own:
//!
//! - [`RobustConnection`] transparently reconnects a WebSocket under a stable identity,
//!   retrying with backoff and re-exposing the underlying connection's lifecycle as a
//!   stream of [`RobustEvent`]s instead of a fixed set of mutable callbacks.
//! - [`BufferedResendConnection`] wraps one `RobustConnection` and adds buffered,
//!   at-least-once resend of outbound messages across a reconnect, against a server that
//!   speaks the small `ACK`/`CONTINUE` handshake described on [`MessageBuffer`].
//!
//! Establishing the physical socket itself is abstracted behind [`PhysicalFactory`], with
//! [`TungsteniteFactory`] as the default, `tokio-tungstenite`-backed implementation.

mod buffered_resend;
mod error;
mod message_buffer;
mod physical;
mod ready_state;
mod retry;
mod robust;

pub use buffered_resend::{BufferedResendConfig, BufferedResendConnection};
pub use error::{CloseError, FactoryError, MessageBufferError, SendError};
pub use message_buffer::MessageBuffer;
pub use physical::{append_robust_param, Message, PhysicalConnection, PhysicalEvent, PhysicalFactory, PhysicalHandle, TungsteniteFactory};
pub use ready_state::ReadyState;
pub use retry::RetryPolicy;
pub use robust::{RobustConfig, RobustConnection, RobustEvent, DEBUG_RECONNECT_CODE};

pub extern crate tokio_tungstenite;
