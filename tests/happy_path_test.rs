//! Connect, exchange messages, and close cleanly — no reconnect involved.

mod support;

use std::time::Duration;

use robust_ws::{Message, ReadyState, RobustConfig, RobustConnection, RobustEvent};
use support::FakeFactory;

#[tokio::test]
async fn connects_sends_receives_and_closes() {
	let (factory, mut handles) = FakeFactory::new();
	factory.push_open();

	let (connection, mut events) = RobustConnection::connect("wss://example.test/ws", RobustConfig::default(), factory);

	assert!(matches!(events.recv().await, Some(RobustEvent::Open)));
	assert_eq!(connection.ready_state(), ReadyState::Open);
	assert_eq!(connection.url(), "wss://example.test/ws");

	let mut physical = support::next_handle(&mut handles).await;
	assert!(physical.url.starts_with("wss://example.test/ws?n="), "url was {}", physical.url);

	connection.send(Message::Text("hello".into())).unwrap();
	assert_eq!(physical.next_sent_text().await, "hello");

	physical.push_text("world");
	assert!(matches!(events.recv().await, Some(RobustEvent::Message(Message::Text(text))) if text == "world"));

	connection.close(1000, "done").await.unwrap();
	physical.close(1000, "done", true);

	let close_event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap();
	assert!(matches!(close_event, Some(RobustEvent::Close { code: 1000, was_clean: true, .. })));
	assert_eq!(connection.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn exposes_the_negotiated_protocol_and_extensions_after_open() {
	let (factory, _handles) = FakeFactory::new();
	factory.push_open_with("chat.v1", "permessage-deflate");

	let (connection, mut events) = RobustConnection::connect("wss://example.test/ws", RobustConfig::default(), factory);

	assert_eq!(connection.protocol(), "");
	assert_eq!(connection.extensions(), "");

	assert!(matches!(events.recv().await, Some(RobustEvent::Open)));

	assert_eq!(connection.protocol(), "chat.v1");
	assert_eq!(connection.extensions(), "permessage-deflate");
}

#[tokio::test]
async fn send_while_not_open_is_rejected() {
	let (factory, _handles) = FakeFactory::new();
	factory.push_open();
	let (connection, mut events) = RobustConnection::connect("wss://example.test/ws", RobustConfig::default(), factory);
	assert!(matches!(events.recv().await, Some(RobustEvent::Open)));

	connection.close(1000, "bye").await.unwrap();
	let result = connection.send(Message::Text("too late".into()));
	assert!(result.is_err());
}
