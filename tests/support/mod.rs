//! Shared test harness: a [`PhysicalFactory`] that never touches a real socket.
//!
//! Each call to `FakeFactory::connect` either fails immediately (if the next queued
//! outcome is a failure) or succeeds and hands the caller a [`PhysicalConnection`], while
//! publishing the matching [`FakeHandle`] on `handles` so the test can drive that
//! connection's inbound events and observe what was sent out.

use std::{
	collections::VecDeque,
	sync::{Arc, Mutex, Once},
};

use async_trait::async_trait;
use robust_ws::{FactoryError, Message, PhysicalConnection, PhysicalEvent, PhysicalFactory};
use tokio::sync::mpsc;

static TRACING_INIT: Once = Once::new();

/// Installs a `tracing` subscriber once for the whole test binary, so `warn!`/`#[instrument]`
/// output from the actor (handshake failures, ack errors, ...) is visible with
/// `RUST_LOG=robust_ws=debug cargo test -- --nocapture` instead of silently going nowhere.
fn init_tracing() {
	TRACING_INIT.call_once(|| {
		let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_test_writer().try_init();
	});
}

pub struct FakeHandle {
	pub url: String,
	pub outbound: mpsc::UnboundedReceiver<Message>,
	pub events: mpsc::UnboundedSender<PhysicalEvent>,
}

impl FakeHandle {
	/// Reads the next outbound wire frame as text, panicking if the connection produced
	/// something else or nothing at all within a short deadline.
	pub async fn next_sent_text(&mut self) -> String {
		let message = tokio::time::timeout(std::time::Duration::from_secs(1), self.outbound.recv())
			.await
			.expect("no outbound message arrived in time")
			.expect("outbound channel closed");
		match message {
			Message::Text(text) => text.to_string(),
			other => panic!("expected a text frame, got {other:?}"),
		}
	}

	pub fn push_text(&self, text: impl Into<String>) {
		let _ = self.events.send(PhysicalEvent::Message(Message::Text(text.into().into())));
	}

	pub fn push_message(&self, message: Message) {
		let _ = self.events.send(PhysicalEvent::Message(message));
	}

	pub fn close(&self, code: u16, reason: impl Into<String>, was_clean: bool) {
		let _ = self.events.send(PhysicalEvent::Closed { code, reason: reason.into(), was_clean });
	}
}

pub struct FakeFactory {
	outcomes: Mutex<VecDeque<Result<(String, String), String>>>,
	handles_tx: mpsc::UnboundedSender<FakeHandle>,
}

impl FakeFactory {
	pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeHandle>) {
		init_tracing();
		let (handles_tx, handles_rx) = mpsc::unbounded_channel();
		(Arc::new(Self { outcomes: Mutex::new(VecDeque::new()), handles_tx }), handles_rx)
	}

	pub fn push_open(&self) {
		self.outcomes.lock().unwrap().push_back(Ok((String::new(), String::new())));
	}

	/// Like `push_open`, but the resulting physical connection reports the given negotiated
	/// subprotocol and extensions, as if a real server had echoed them back.
	pub fn push_open_with(&self, protocol: impl Into<String>, extensions: impl Into<String>) {
		self.outcomes.lock().unwrap().push_back(Ok((protocol.into(), extensions.into())));
	}

	pub fn push_failure(&self, detail: impl Into<String>) {
		self.outcomes.lock().unwrap().push_back(Err(detail.into()));
	}
}

#[async_trait]
impl PhysicalFactory for FakeFactory {
	async fn connect(&self, url: &str) -> Result<PhysicalConnection, FactoryError> {
		let outcome = self.outcomes.lock().unwrap().pop_front();
		match outcome {
			Some(Ok((protocol, extensions))) => {
				let (connection, handle) = PhysicalConnection::new(protocol, extensions);
				let _ = self.handles_tx.send(FakeHandle { url: url.to_string(), outbound: handle.outbound, events: handle.events });
				Ok(connection)
			}
			Some(Err(detail)) => Err(FactoryError::Other(detail)),
			None => Err(FactoryError::Other("FakeFactory ran out of queued outcomes".to_string())),
		}
	}
}

pub async fn next_handle(handles: &mut mpsc::UnboundedReceiver<FakeHandle>) -> FakeHandle {
	tokio::time::timeout(std::time::Duration::from_secs(1), handles.recv()).await.expect("no physical connection attempted in time").expect("factory handle channel closed")
}
