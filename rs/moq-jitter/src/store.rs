use std::collections::{BTreeMap, btree_map};

use crate::{Frame, Sequence};

/// The frames waiting to be played, ordered by [Sequence].
///
/// Inserting a sequence that is already present is a no-op: the first write wins.
/// There is no capacity limit, callers bound the arrival rate.
#[derive(Debug, Default)]
pub struct FrameStore {
	frames: BTreeMap<Sequence, Frame>,
}

impl FrameStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a frame, returning false if its sequence was already buffered.
	pub fn insert(&mut self, frame: Frame) -> bool {
		match self.frames.entry(frame.sequence()) {
			btree_map::Entry::Occupied(_) => false,
			btree_map::Entry::Vacant(entry) => {
				entry.insert(frame);
				true
			}
		}
	}

	/// Remove and return the frame with the lowest sequence.
	///
	/// Missing sequences are skipped rather than waited for.
	pub fn pop_first(&mut self) -> Option<Frame> {
		self.frames.pop_first().map(|(_, frame)| frame)
	}

	/// The frame that [Self::pop_first] would return.
	pub fn first(&self) -> Option<&Frame> {
		self.frames.first_key_value().map(|(_, frame)| frame)
	}

	pub fn contains(&self, sequence: Sequence) -> bool {
		self.frames.contains_key(&sequence)
	}

	pub fn len(&self) -> usize {
		self.frames.len()
	}

	pub fn is_empty(&self) -> bool {
		self.frames.is_empty()
	}

	/// Discard every frame, returning how many were dropped.
	pub fn clear(&mut self) -> usize {
		let count = self.frames.len();
		self.frames.clear();
		count
	}
}
