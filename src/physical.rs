use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

pub use tungstenite::Message;

use crate::error::FactoryError;

/// A single event arriving from a physical connection, as observed by the actor that owns
/// it.
///
/// `Closed` is always the last event a given physical connection produces; nothing is sent
/// on its `events` channel afterwards.
#[derive(Debug, Clone)]
pub enum PhysicalEvent {
	Message(Message),
	Error(String),
	Closed { code: u16, reason: String, was_clean: bool },
}

/// One physical socket, as handed back by a [`PhysicalFactory`].
///
/// Closing is just another message: send `Message::Close(frame)` through `outbound` and the
/// underlying transport is expected to emit a final `Closed` event once it has actually gone
/// away, the same as any peer-initiated close.
pub struct PhysicalConnection {
	pub protocol: String,
	pub extensions: String,
	pub(crate) outbound: mpsc::UnboundedSender<Message>,
	pub(crate) events: mpsc::UnboundedReceiver<PhysicalEvent>,
}

/// The other half of a hand-built [`PhysicalConnection`], returned by
/// [`PhysicalConnection::new`].
///
/// Meant for implementing bespoke or in-memory [`PhysicalFactory`]s — most usefully, a fake
/// one for tests that drives reconnect and resend scenarios without opening real sockets.
pub struct PhysicalHandle {
	pub outbound: mpsc::UnboundedReceiver<Message>,
	pub events: mpsc::UnboundedSender<PhysicalEvent>,
}

impl PhysicalConnection {
	/// Builds a connected pair: a [`PhysicalConnection`] for the actor to hold, and a
	/// [`PhysicalHandle`] for whatever is standing in for the transport to drive it from
	/// the other side.
	pub fn new(protocol: impl Into<String>, extensions: impl Into<String>) -> (Self, PhysicalHandle) {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		(Self { protocol: protocol.into(), extensions: extensions.into(), outbound: outbound_tx, events: events_rx }, PhysicalHandle { outbound: outbound_rx, events: events_tx })
	}

	/// Enqueues `message` for the physical connection. Returns `false` if the writer side
	/// has already torn down (the connection is effectively gone), in which case the
	/// message is dropped.
	pub(crate) fn send(&self, message: Message) -> bool {
		self.outbound.send(message).is_ok()
	}
}

/// Establishes physical connections. Injected so tests can substitute an in-memory
/// implementation instead of opening real sockets.
#[async_trait]
pub trait PhysicalFactory: Send + Sync {
	async fn connect(&self, url: &str) -> Result<PhysicalConnection, FactoryError>;
}

/// Appends the robust connection id as a query parameter: `n` on a connection's very first
/// attempt, `o` on every attempt after that (reconnects and resumes alike).
pub fn append_robust_param(url: &str, is_first_attempt: bool, robust_id: &str) -> String {
	let key = if is_first_attempt { "n" } else { "o" };
	let separator = if url.contains('?') { '&' } else { '?' };
	format!("{url}{separator}{key}={robust_id}")
}

/// Default [`PhysicalFactory`], backed by `tokio-tungstenite`.
#[derive(Debug, Default)]
pub struct TungsteniteFactory;

#[async_trait]
impl PhysicalFactory for TungsteniteFactory {
	async fn connect(&self, url: &str) -> Result<PhysicalConnection, FactoryError> {
		let (stream, response) = tokio_tungstenite::connect_async(url).await?;
		let protocol = header_value(response.headers(), "sec-websocket-protocol");
		let extensions = header_value(response.headers(), "sec-websocket-extensions");

		let (mut sink, mut source) = stream.split();
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
		let (events_tx, events_rx) = mpsc::unbounded_channel::<PhysicalEvent>();

		tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				let is_close = matches!(message, Message::Close(_));
				if let Err(error) = sink.send(message).await {
					tracing::debug!(%error, "failed to write to physical connection");
					break;
				}
				if is_close {
					let _ = sink.close().await;
					break;
				}
			}
		});

		let pong_tx = outbound_tx.clone();
		tokio::spawn(async move {
			let mut got_close_frame = false;
			let mut had_error = false;
			let mut close_code = 1006u16;
			let mut close_reason = String::new();

			while let Some(item) = source.next().await {
				match item {
					Ok(Message::Close(frame)) => {
						got_close_frame = true;
						if let Some(frame) = frame {
							close_code = frame.code.into();
							close_reason = frame.reason.to_string();
						}
						break;
					}
					Ok(Message::Ping(payload)) => {
						let _ = pong_tx.send(Message::Pong(payload));
					}
					Ok(Message::Pong(_)) => {}
					Ok(message) => {
						let _ = events_tx.send(PhysicalEvent::Message(message));
					}
					Err(error) => {
						had_error = true;
						let _ = events_tx.send(PhysicalEvent::Error(error.to_string()));
						break;
					}
				}
			}

			let was_clean = got_close_frame && !had_error;
			let _ = events_tx.send(PhysicalEvent::Closed { code: close_code, reason: close_reason, was_clean });
		});

		Ok(PhysicalConnection { protocol, extensions, outbound: outbound_tx, events: events_rx })
	}
}

fn header_value(headers: &tungstenite::http::HeaderMap, name: &str) -> String {
	headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default().to_owned()
}
