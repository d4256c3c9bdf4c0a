//! `close()` called while a reconnect is in flight (no physical bound yet) must not leak the
//! physical connection the in-flight attempt eventually produces: it has to be closed and
//! discarded, even though the logical connection already reported itself `Closed`.

mod support;

use std::time::Duration;

use robust_ws::{Message, ReadyState, RobustConfig, RobustConnection, RobustEvent};
use support::FakeFactory;

#[tokio::test]
async fn close_during_inflight_reconnect_discards_the_new_physical_instead_of_leaking_it() {
	let (factory, mut handles) = FakeFactory::new();
	factory.push_open();
	factory.push_open();

	let (connection, mut events) = RobustConnection::connect("wss://example.test/ws", RobustConfig::default(), factory);
	assert!(matches!(events.recv().await, Some(RobustEvent::Open)));
	let first_physical = support::next_handle(&mut handles).await;

	// an unclean drop triggers a reconnect; the actor now holds no physical connection and
	// has a reconnect attempt in flight.
	first_physical.close(1006, "dropped", false);
	assert!(matches!(events.recv().await, Some(RobustEvent::Disconnect)));

	// close() lands while `physical` is still `None` — exactly the window where the old
	// code would set state to `Closed` and `break` the actor loop immediately, regardless
	// of the reconnect attempt already under way.
	connection.close(1000, "bye").await.unwrap();
	assert_eq!(connection.ready_state(), ReadyState::Closed);

	// the reconnect attempt completes independently of the actor (it's a separately spawned
	// task), so its physical connection still gets created and published here...
	let mut second_physical = support::next_handle(&mut handles).await;

	// ...but the actor must still be alive to close and discard it rather than abandoning
	// it: under the bug, nothing is ever sent here and this times out.
	let sent = tokio::time::timeout(Duration::from_secs(1), second_physical.outbound.recv()).await.expect("actor exited without closing the reconnected physical, leaking it");
	assert!(matches!(sent, Some(Message::Close(None))), "expected the leaked-avoidance close frame, got {sent:?}");

	// exactly one `Close` event was emitted for the explicit close() call, and the actor
	// then shuts down cleanly (no second, spurious close from the reconnect settling).
	match events.recv().await {
		Some(RobustEvent::Close { code: 1000, was_clean: false, .. }) => {}
		other => panic!("expected the explicit close's 1000 event, got {other:?}"),
	}
	assert!(events.recv().await.is_none(), "actor should have exited after closing the reconnected physical");
}
