use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{instrument, warn};

use crate::{
	error::{CloseError, SendError},
	message_buffer::MessageBuffer,
	physical::{Message, PhysicalFactory},
	ready_state::ReadyState,
	robust::{RobustConfig, RobustConnection, RobustEvent},
};

#[derive(Debug, Clone)]
pub struct BufferedResendConfig {
	/// Close code used when a `CONTINUE` handshake after reconnect is malformed or absent.
	pub handshake_failure_code: u16,
	/// Close code used when the peer acks an id this side never issued.
	pub ack_out_of_range_code: u16,
}

impl Default for BufferedResendConfig {
	fn default() -> Self {
		Self { handshake_failure_code: 3007, ack_out_of_range_code: 3008 }
	}
}

enum ResendCommand {
	Send(String, oneshot::Sender<Result<(), SendError>>),
}

/// Wraps exactly one [`RobustConnection`], tagging every outbound message with an id and
/// replaying whatever the peer is missing after a reconnect.
///
/// The wire protocol is a small text-based handshake layered over the underlying
/// connection's messages: outbound frames are `<HEXID>|<payload>`; inbound control frames
/// are `ACK <HEXID>` (the peer has durably received everything before that id) and
/// `CONTINUE <HEXID>` (sent once, immediately after a reconnect, telling this side where to
/// resume resending from).
#[derive(Clone)]
pub struct BufferedResendConnection {
	commands: mpsc::UnboundedSender<ResendCommand>,
	inner: RobustConnection,
}

impl BufferedResendConnection {
	/// Connects to `url` and wraps the resulting [`RobustConnection`] in one step.
	pub fn connect(url: impl Into<String>, robust_config: RobustConfig, resend_config: BufferedResendConfig, factory: Arc<dyn PhysicalFactory>) -> (Self, mpsc::UnboundedReceiver<RobustEvent>) {
		let (inner, inbound) = RobustConnection::connect(url, robust_config, factory);
		Self::wrap(inner, inbound, resend_config)
	}

	/// Wraps an already-constructed [`RobustConnection`] and takes over its event stream.
	pub fn wrap(inner: RobustConnection, inbound: mpsc::UnboundedReceiver<RobustEvent>, config: BufferedResendConfig) -> (Self, mpsc::UnboundedReceiver<RobustEvent>) {
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (events_tx, events_rx) = mpsc::unbounded_channel();

		let actor = ResendActor { inner: inner.clone(), inbound, commands: commands_rx, events: events_tx, buffer: MessageBuffer::new(), disconnected: false, expecting_continue: false, config };
		tokio::spawn(actor.run());

		(Self { commands: commands_tx, inner }, events_rx)
	}

	pub fn ready_state(&self) -> ReadyState {
		self.inner.ready_state()
	}

	pub fn url(&self) -> &str {
		self.inner.url()
	}

	pub fn protocol(&self) -> String {
		self.inner.protocol()
	}

	pub fn extensions(&self) -> String {
		self.inner.extensions()
	}

	/// Tags `payload` with the next id and sends it. While a reconnect handshake is in
	/// flight, it is retained in the buffer and resent once `CONTINUE` is handled, rather
	/// than sent directly.
	pub async fn send(&self, payload: impl Into<String>) -> Result<(), SendError> {
		let (ack_tx, ack_rx) = oneshot::channel();
		self.commands.send(ResendCommand::Send(payload.into(), ack_tx)).map_err(|_| SendError::ActorGone)?;
		ack_rx.await.map_err(|_| SendError::ActorGone)?
	}

	pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), CloseError> {
		self.inner.close(code, reason).await
	}
}

struct ResendActor {
	inner: RobustConnection,
	inbound: mpsc::UnboundedReceiver<RobustEvent>,
	commands: mpsc::UnboundedReceiver<ResendCommand>,
	events: mpsc::UnboundedSender<RobustEvent>,
	buffer: MessageBuffer,
	/// Set once a physical drop is observed, cleared once a `CONTINUE` handshake
	/// completes; while set, outbound sends are buffered but not forwarded.
	disconnected: bool,
	/// Set once a reconnect is observed, cleared after the first inbound frame (of any
	/// kind) is consumed as the `CONTINUE` handshake (success or failure).
	expecting_continue: bool,
	config: BufferedResendConfig,
}

impl ResendActor {
	#[instrument(name = "buffered_resend_connection", skip_all)]
	async fn run(mut self) {
		loop {
			tokio::select! {
				command = self.commands.recv() => {
					match command {
						Some(ResendCommand::Send(payload, ack)) => {
							let wire = self.buffer.write(&payload);
							let result = if self.disconnected {
								Ok(())
							} else {
								self.inner.send(Message::Text(wire.into()))
							};
							let _ = ack.send(result);
						}
						None => break,
					}
				}
				event = self.inbound.recv() => {
					match event {
						Some(RobustEvent::Disconnect) => {
							self.disconnected = true;
							let _ = self.events.send(RobustEvent::Disconnect);
						}
						Some(RobustEvent::Reconnect) => {
							self.expecting_continue = true;
							let _ = self.events.send(RobustEvent::Reconnect);
						}
						Some(RobustEvent::Message(message)) => self.handle_inbound_message(message).await,
						Some(other) => {
							let _ = self.events.send(other);
						}
						None => break,
					}
				}
			}
		}
	}

	async fn handle_inbound_message(&mut self, message: Message) {
		// The CONTINUE handshake owns the very next frame unconditionally, text or not —
		// checked ahead of the text/non-text split so a stray Binary frame here is a
		// protocol error rather than something silently delivered to the consumer.
		if self.expecting_continue {
			self.expecting_continue = false;
			match &message {
				Message::Text(text) => match text.strip_prefix("CONTINUE ").map(parse_hex_id) {
					Some(Ok(continue_id)) => match self.replay_from(continue_id) {
						Ok(()) => self.disconnected = false,
						Err(detail) => self.fail_handshake(&detail).await,
					},
					Some(Err(detail)) => self.fail_handshake(&detail).await,
					None => self.fail_handshake(&format!("expected a CONTINUE frame, got {text:?}")).await,
				},
				other => self.fail_handshake(&format!("expected a CONTINUE frame, got {other:?}")).await,
			}
			return;
		}

		let Message::Text(text) = &message else {
			let _ = self.events.send(RobustEvent::Message(message));
			return;
		};

		match text.strip_prefix("ACK ") {
			Some(rest) if looks_like_hex_id(rest) => match parse_hex_id(rest) {
				Ok(first_unseen_id) => {
					if let Err(error) = self.buffer.discard(first_unseen_id) {
						self.fail_ack(&error.to_string()).await;
					}
				}
				Err(detail) => self.fail_ack(&detail).await,
			},
			_ => {
				let _ = self.events.send(RobustEvent::Message(message));
			}
		}
	}

	fn replay_from(&mut self, continue_id: u64) -> Result<(), String> {
		self.buffer.discard(continue_id).map_err(|error| error.to_string())?;
		for wire in self.buffer.get_messages_from(continue_id).map_err(|error| error.to_string())? {
			self.inner.send(Message::Text(wire.into())).ok();
		}
		Ok(())
	}

	async fn fail_handshake(&mut self, detail: &str) {
		warn!(detail, "CONTINUE handshake failed");
		let _ = self.inner.close(self.config.handshake_failure_code, format!("handshake error: {detail}")).await;
	}

	async fn fail_ack(&mut self, detail: &str) {
		warn!(detail, "peer acked an id outside the buffered range");
		let _ = self.inner.close(self.config.ack_out_of_range_code, format!("ack error: {detail}")).await;
	}
}

/// Whether `candidate` matches the wire grammar `[0-9A-F]+` exactly (no sign, no
/// lowercase, no leading `0x`, not empty). Used to decide whether an inbound frame is
/// attempting to be an `ACK`/`CONTINUE` control frame at all, as opposed to an ordinary
/// application message that happens to start with the same prefix.
fn looks_like_hex_id(candidate: &str) -> bool {
	!candidate.is_empty() && candidate.bytes().all(|byte| byte.is_ascii_hexdigit() && !byte.is_ascii_lowercase())
}

/// Parses a string already known to match [`looks_like_hex_id`] as an id. The only way
/// this can still fail is a value too large for `u64`.
fn parse_hex_id(hex: &str) -> Result<u64, String> {
	if !looks_like_hex_id(hex) {
		return Err(format!("invalid hex id: {hex:?}"));
	}
	u64::from_str_radix(hex, 16).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_hex_id_accepts_uppercase_only() {
		assert_eq!(parse_hex_id("1A"), Ok(26));
		assert!(parse_hex_id("1a").is_err());
		assert!(parse_hex_id("").is_err());
		assert!(parse_hex_id("1G").is_err());
	}

	#[test]
	fn looks_like_hex_id_rejects_non_hex_and_empty() {
		assert!(looks_like_hex_id("1A2B"));
		assert!(!looks_like_hex_id(""));
		assert!(!looks_like_hex_id("1a2b"));
		assert!(!looks_like_hex_id("not-hex"));
	}
}
