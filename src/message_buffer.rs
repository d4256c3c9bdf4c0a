use std::collections::VecDeque;

use crate::error::MessageBufferError;

/// An append-only log of outbound messages, each tagged with a monotonically increasing
/// id, used to resend whatever a peer missed across a reconnect.
///
/// Ids are assigned in `write` order starting at zero. `discard` advances the low
/// watermark (the "floor"); anything at or past the floor can still be replayed via
/// `get_messages_from`.
#[derive(Debug, Default)]
pub struct MessageBuffer {
	floor_id: u64,
	next_id: u64,
	records: VecDeque<(u64, String)>,
}

impl MessageBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of messages currently retained.
	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Assigns the next id to `payload`, retains it, and returns the wire-framed record
	/// (`<HEXID>|<payload>`) ready to send.
	pub fn write(&mut self, payload: &str) -> String {
		let id = self.next_id;
		self.next_id += 1;
		let wire = format!("{id:X}|{payload}");
		self.records.push_back((id, wire.clone()));
		wire
	}

	/// Drops every retained record with id strictly less than `first_unseen_id` and
	/// advances the floor to it.
	///
	/// A `first_unseen_id` at or below the current floor is a no-op (`Ok(0)`) rather than
	/// an error — it tolerates a duplicate or late-arriving ack for ids already discarded.
	/// A `first_unseen_id` past every id ever issued is the real error case: it would
	/// silently skip records we never wrote.
	pub fn discard(&mut self, first_unseen_id: u64) -> Result<usize, MessageBufferError> {
		if first_unseen_id > self.next_id {
			return Err(MessageBufferError::OutOfRange { id: first_unseen_id, floor: self.floor_id, next: self.next_id });
		}
		if first_unseen_id <= self.floor_id {
			return Ok(0);
		}
		let mut dropped = 0;
		while let Some((id, _)) = self.records.front() {
			if *id < first_unseen_id {
				self.records.pop_front();
				dropped += 1;
			} else {
				break;
			}
		}
		self.floor_id = first_unseen_id;
		Ok(dropped)
	}

	/// Returns the wire-framed records at or after `first_unseen_id`, in id order.
	///
	/// Fails if `first_unseen_id` is below the floor (those records are gone for good)
	/// or past every id ever issued (it was never ours to give out).
	pub fn get_messages_from(&self, first_unseen_id: u64) -> Result<Vec<String>, MessageBufferError> {
		if first_unseen_id > self.next_id || first_unseen_id < self.floor_id {
			return Err(MessageBufferError::OutOfRange { id: first_unseen_id, floor: self.floor_id, next: self.next_id });
		}
		Ok(self.records.iter().filter(|(id, _)| *id >= first_unseen_id).map(|(_, wire)| wire.clone()).collect())
	}
}
