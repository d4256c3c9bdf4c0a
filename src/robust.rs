use std::{
	collections::VecDeque,
	sync::{
		atomic::{AtomicU8, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use tracing::{instrument, warn};

use crate::{
	error::{CloseError, FactoryError, SendError},
	physical::{append_robust_param, Message, PhysicalConnection, PhysicalEvent, PhysicalFactory},
	ready_state::ReadyState,
	retry::{connect_with_backoff, RetryPolicy},
};

/// Close code that, even on an otherwise clean close, is treated as a request to
/// reconnect rather than a terminal close. Exists for interactively testing recovery
/// against a server that does not otherwise misbehave.
pub const DEBUG_RECONNECT_CODE: u16 = 4567;

/// Synthetic code used when no physical close frame was ever received (the retry deadline
/// was reached, or the connection dropped without a handshake).
const ABNORMAL_CLOSE_CODE: u16 = 1006;

#[derive(Debug, Clone)]
pub struct RobustConfig {
	/// Upper bound on how long a reconnect attempt (including all of its backed-off
	/// retries) may run before the connection gives up and closes with code 1006.
	/// `None` disables reconnecting entirely: any physical drop is terminal.
	pub reconnect_timeout: Option<Duration>,
	pub retry_policy: RetryPolicy,
	pub debug_reconnect_code: u16,
}

impl Default for RobustConfig {
	fn default() -> Self {
		Self { reconnect_timeout: Some(Duration::from_secs(30)), retry_policy: RetryPolicy::default(), debug_reconnect_code: DEBUG_RECONNECT_CODE }
	}
}

/// An event emitted by a [`RobustConnection`] over its lifetime.
///
/// Takes the place of the mutable `onopen`/`onmessage`/`onclose`/... callback slots a
/// browser `WebSocket` exposes: a typed stream is the natural shape for this in async Rust,
/// and lets a consumer `select!` over several connections at once.
#[derive(Debug, Clone)]
pub enum RobustEvent {
	Open,
	Message(Message),
	Error(String),
	Close { code: u16, reason: String, was_clean: bool },
	Disconnect,
	Reconnect,
}

enum Command {
	Send(Message),
	Close(u16, String, oneshot::Sender<Result<(), CloseError>>),
}

/// A handle to a logical WebSocket connection that transparently reconnects underneath a
/// stable identity.
///
/// All mutable state lives in a single task spawned by [`RobustConnection::connect`];
/// handles only ever talk to it through channels, so `RobustConnection` is cheaply
/// `Clone` and safe to share across tasks without additional locking.
#[derive(Clone)]
pub struct RobustConnection {
	commands: mpsc::UnboundedSender<Command>,
	ready_state: Arc<AtomicU8>,
	url: Arc<str>,
	negotiated: Arc<Mutex<Negotiated>>,
}

/// Protocol/extensions negotiated by whichever physical connection is currently (or was
/// most recently) bound, mirroring the read-only `protocol`/`extensions` a browser
/// `WebSocket` exposes. Empty until the first `Open`.
#[derive(Debug, Clone, Default)]
struct Negotiated {
	protocol: String,
	extensions: String,
}

impl RobustConnection {
	/// Starts connecting to `url` and returns a handle paired with the event stream for
	/// this connection's lifetime. The actor task keeps running, attempting to reconnect
	/// per `config`, until `close` is called or the event receiver and every clone of the
	/// handle are dropped.
	pub fn connect(url: impl Into<String>, config: RobustConfig, factory: Arc<dyn PhysicalFactory>) -> (Self, mpsc::UnboundedReceiver<RobustEvent>) {
		let url: Arc<str> = url.into().into();
		let robust_id = generate_robust_id();
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let ready_state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
		let negotiated = Arc::new(Mutex::new(Negotiated::default()));

		let actor = Actor {
			url: url.to_string(),
			robust_id,
			config,
			factory,
			events: events_tx,
			commands: commands_rx,
			ready_state: ready_state.clone(),
			negotiated: negotiated.clone(),
			state: ReadyState::Connecting,
			stay_closed: false,
			physical: None,
			pending_sends: VecDeque::new(),
		};
		tokio::spawn(actor.run());

		(Self { commands: commands_tx, ready_state, url, negotiated }, events_rx)
	}

	/// The base URL this connection was constructed with (without the `n`/`o` robust-id
	/// parameter, which is appended fresh on each physical attempt).
	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn ready_state(&self) -> ReadyState {
		ReadyState::from(self.ready_state.load(Ordering::SeqCst))
	}

	/// The subprotocol negotiated by whichever physical connection is currently (or was
	/// most recently) bound. Empty before the first `Open`.
	pub fn protocol(&self) -> String {
		self.negotiated.lock().unwrap().protocol.clone()
	}

	/// The extensions negotiated by whichever physical connection is currently (or was
	/// most recently) bound. Empty before the first `Open`.
	pub fn extensions(&self) -> String {
		self.negotiated.lock().unwrap().extensions.clone()
	}

	/// Sends `message`, buffering it on the actor task if a reconnect is currently in
	/// flight. Fails immediately if the connection is not `Open` (mirrors a browser
	/// `WebSocket`'s `send` while `CONNECTING`/`CLOSING`/`CLOSED`).
	pub fn send(&self, message: Message) -> Result<(), SendError> {
		if self.ready_state() != ReadyState::Open {
			return Err(SendError::NotOpen(self.ready_state()));
		}
		self.commands.send(Command::Send(message)).map_err(|_| SendError::ActorGone)
	}

	/// Requests a close with `code`/`reason`. Once the underlying physical connection
	/// confirms the close (or is confirmed gone), the connection will not reconnect again
	/// regardless of `config`.
	pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), CloseError> {
		if self.ready_state() == ReadyState::Closed {
			return Ok(());
		}
		let (ack_tx, ack_rx) = oneshot::channel();
		self.commands.send(Command::Close(code, reason.into(), ack_tx)).map_err(|_| CloseError::ActorGone)?;
		ack_rx.await.map_err(|_| CloseError::ActorGone)?
	}
}

struct Actor {
	url: String,
	robust_id: String,
	config: RobustConfig,
	factory: Arc<dyn PhysicalFactory>,
	events: mpsc::UnboundedSender<RobustEvent>,
	commands: mpsc::UnboundedReceiver<Command>,
	ready_state: Arc<AtomicU8>,
	negotiated: Arc<Mutex<Negotiated>>,
	state: ReadyState,
	stay_closed: bool,
	physical: Option<PhysicalConnection>,
	pending_sends: VecDeque<Message>,
}

impl Actor {
	#[instrument(name = "robust_connection", skip_all, fields(robust_id = %self.robust_id, url = %self.url))]
	async fn run(mut self) {
		if let Err(error) = url::Url::parse(&self.url) {
			warn!(%error, "connection url does not parse");
			let error = FactoryError::from(error);
			let _ = self.events.send(RobustEvent::Error(error.to_string()));
			self.set_state(ReadyState::Closed);
			let _ = self.events.send(RobustEvent::Close { code: ABNORMAL_CLOSE_CODE, reason: String::new(), was_clean: false });
			return;
		}

		let first_url = append_robust_param(&self.url, true, &self.robust_id);
		match self.factory.connect(&first_url).await {
			Ok(physical) => {
				self.record_negotiated(&physical);
				self.physical = Some(physical);
				self.set_state(ReadyState::Open);
				let _ = self.events.send(RobustEvent::Open);
			}
			Err(error) => {
				warn!(%error, "initial connect failed");
				let _ = self.events.send(RobustEvent::Error(error.to_string()));
				self.set_state(ReadyState::Closed);
				let _ = self.events.send(RobustEvent::Close { code: ABNORMAL_CLOSE_CODE, reason: String::new(), was_clean: false });
				return;
			}
		}

		let mut reconnecting: Option<oneshot::Receiver<Result<PhysicalConnection, FactoryError>>> = None;

		loop {
			tokio::select! {
				command = self.commands.recv() => {
					match command {
						Some(Command::Send(message)) => self.handle_send(message),
						Some(Command::Close(code, reason, ack)) => {
							let result = self.handle_close(code, reason);
							// A reconnect may already be in flight (or its factory attempt may
							// have already resolved, just not yet observed by this loop). Even
							// though `handle_close` already moved the logical state to `Closed`,
							// we must not exit yet: doing so would let `reconnecting` — and
							// whatever `PhysicalConnection` it may already hold — drop silently
							// instead of being closed and discarded by the `recv_reconnect` arm
							// below. Stick around until that arm has had its turn.
							let should_stop = self.state == ReadyState::Closed && reconnecting.is_none();
							let _ = ack.send(result);
							if should_stop {
								break;
							}
						}
						None => break,
					}
				}
				event = recv_physical(&mut self.physical) => {
					match event {
						Some(PhysicalEvent::Message(message)) => {
							let _ = self.events.send(RobustEvent::Message(message));
						}
						Some(PhysicalEvent::Error(detail)) => {
							let _ = self.events.send(RobustEvent::Error(detail));
						}
						Some(PhysicalEvent::Closed { code, reason, was_clean }) => {
							self.physical = None;
							let should_reconnect = !self.stay_closed && (!was_clean || code == self.config.debug_reconnect_code);
							if should_reconnect {
								let _ = self.events.send(RobustEvent::Disconnect);
								reconnecting = Some(self.spawn_reconnect());
							} else {
								self.set_state(ReadyState::Closed);
								let _ = self.events.send(RobustEvent::Close { code, reason, was_clean });
								break;
							}
						}
						None => {}
					}
				}
				result = recv_reconnect(&mut reconnecting) => {
					reconnecting = None;
					match result {
						Some(Ok(physical)) => {
							if self.stay_closed {
								// `close()` won this race: the physical never gets adopted,
								// just told to go away. If the close already moved us to
								// `Closed` (the no-physical-bound path in `handle_close`),
								// that event was already emitted, so just leave now.
								physical.send(Message::Close(None));
								if self.state == ReadyState::Closed {
									break;
								}
								continue;
							}
							self.record_negotiated(&physical);
							self.physical = Some(physical);
							self.set_state(ReadyState::Open);
							let _ = self.events.send(RobustEvent::Reconnect);
							self.drain_pending_sends();
						}
						Some(Err(_deadline_exceeded)) => {
							// `close()` may have already settled this into `Closed` (and
							// emitted its own `Close` event) while this attempt was still
							// running; don't emit a second one.
							if self.state != ReadyState::Closed {
								self.set_state(ReadyState::Closed);
								let _ = self.events.send(RobustEvent::Close { code: ABNORMAL_CLOSE_CODE, reason: String::new(), was_clean: false });
							}
							break;
						}
						None => {}
					}
				}
			}
		}
	}

	fn set_state(&mut self, new_state: ReadyState) {
		debug_assert!(new_state >= self.state, "ready state must not move backwards");
		self.state = new_state;
		self.ready_state.store(new_state as u8, Ordering::SeqCst);
	}

	fn record_negotiated(&self, physical: &PhysicalConnection) {
		let mut negotiated = self.negotiated.lock().unwrap();
		negotiated.protocol = physical.protocol.clone();
		negotiated.extensions = physical.extensions.clone();
	}

	fn handle_send(&mut self, message: Message) {
		match &self.physical {
			Some(physical) => {
				physical.send(message);
			}
			None => self.pending_sends.push_back(message),
		}
	}

	fn drain_pending_sends(&mut self) {
		if let Some(physical) = &self.physical {
			for message in self.pending_sends.drain(..) {
				physical.send(message);
			}
		}
	}

	fn handle_close(&mut self, code: u16, reason: String) -> Result<(), CloseError> {
		if self.state == ReadyState::Closed {
			return Ok(());
		}
		validate_close_code(code)?;
		self.stay_closed = true;
		match &self.physical {
			Some(physical) => {
				if physical.send(Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame { code: code.into(), reason: reason.clone().into() }))) {
					self.set_state(ReadyState::Closing);
				} else {
					self.set_state(ReadyState::Closed);
					let _ = self.events.send(RobustEvent::Close { code, reason, was_clean: false });
				}
			}
			None => {
				self.set_state(ReadyState::Closed);
				let _ = self.events.send(RobustEvent::Close { code, reason, was_clean: false });
			}
		}
		Ok(())
	}

	fn spawn_reconnect(&mut self) -> oneshot::Receiver<Result<PhysicalConnection, FactoryError>> {
		let (result_tx, result_rx) = oneshot::channel();
		let Some(deadline) = self.config.reconnect_timeout else {
			let _ = result_tx.send(Err(FactoryError::DeadlineExceeded));
			return result_rx;
		};
		let factory = Arc::clone(&self.factory);
		let url = append_robust_param(&self.url, false, &self.robust_id);
		let policy = self.config.retry_policy.clone();
		tokio::spawn(async move {
			let result = connect_with_backoff(factory.as_ref(), &url, &policy, deadline).await;
			let _ = result_tx.send(result);
		});
		result_rx
	}
}

async fn recv_physical(physical: &mut Option<PhysicalConnection>) -> Option<PhysicalEvent> {
	match physical {
		Some(physical) => physical.events.recv().await,
		None => std::future::pending().await,
	}
}

async fn recv_reconnect(pending: &mut Option<oneshot::Receiver<Result<PhysicalConnection, FactoryError>>>) -> Option<Result<PhysicalConnection, FactoryError>> {
	match pending {
		Some(receiver) => receiver.await.ok(),
		None => std::future::pending().await,
	}
}

fn validate_close_code(code: u16) -> Result<(), CloseError> {
	let valid = code == 1000 || ((1001..=1011).contains(&code) && !matches!(code, 1004 | 1005 | 1006)) || (3000..=4999).contains(&code);
	if valid {
		Ok(())
	} else {
		Err(CloseError::InvalidCode(code))
	}
}

fn generate_robust_id() -> String {
	const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
	let mut rng = rand::rng();
	(0..18).map(|_| CHARSET[rand::Rng::random_range(&mut rng, 0..CHARSET.len())] as char).collect()
}
