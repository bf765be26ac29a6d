use std::fmt;

use bytes::Bytes;
use derive_more::Debug;

/// The ordering key for a frame: `(group << 16) | object`.
///
/// Frames with the same sequence are the same frame, regardless of payload.
/// Group IDs above 2^48 wrap around and alias lower groups.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sequence(u64);

impl Sequence {
	pub const fn new(group: u64, object: u16) -> Self {
		Self((group << 16) | object as u64)
	}

	/// The group ID, modulo 2^48.
	pub const fn group(self) -> u64 {
		self.0 >> 16
	}

	pub const fn object(self) -> u16 {
		self.0 as u16
	}

	pub const fn into_inner(self) -> u64 {
		self.0
	}
}

impl From<u64> for Sequence {
	fn from(value: u64) -> Self {
		Self(value)
	}
}

impl From<Sequence> for u64 {
	fn from(sequence: Sequence) -> Self {
		sequence.0
	}
}

impl fmt::Display for Sequence {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.group(), self.object())
	}
}

impl fmt::Debug for Sequence {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

/// A compressed video frame as received from the network.
///
/// The payload is opaque to the buffer; only the group and object IDs matter.
#[derive(Clone, Debug)]
pub struct Frame {
	/// The MoQ group ID, typically one per group of pictures.
	pub group: u64,

	/// The MoQ object ID, the frame's position within the group.
	pub object: u16,

	/// Whether this frame can be decoded independently.
	///
	/// Informational only, the buffer never reorders or drops based on it.
	pub keyframe: bool,

	/// The encoded frame.
	#[debug("{} bytes", payload.len())]
	pub payload: Bytes,
}

impl Frame {
	/// Create a frame, marking the first object of each group as the keyframe.
	pub fn new(group: u64, object: u16, payload: impl Into<Bytes>) -> Self {
		Self {
			group,
			object,
			keyframe: object == 0,
			payload: payload.into(),
		}
	}

	pub fn sequence(&self) -> Sequence {
		Sequence::new(self.group, self.object)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sequence_packs_group_and_object() {
		let seq = Sequence::new(3, 7);
		assert_eq!(seq.into_inner(), (3 << 16) | 7);
		assert_eq!(seq.group(), 3);
		assert_eq!(seq.object(), 7);
	}

	#[test]
	fn sequence_orders_by_group_first() {
		assert!(Sequence::new(0, u16::MAX) < Sequence::new(1, 0));
		assert!(Sequence::new(1, 0) < Sequence::new(1, 1));
	}

	#[test]
	fn sequence_ignores_payload() {
		let a = Frame::new(4, 2, "hello");
		let b = Frame::new(4, 2, "world");
		assert_eq!(a.sequence(), b.sequence());
	}

	#[test]
	fn sequence_display() {
		assert_eq!(Sequence::new(12, 3).to_string(), "12:3");
	}

	#[test]
	fn debug_hides_payload() {
		let frame = Frame::new(1, 0, vec![0u8; 42]);
		let debug = format!("{frame:?}");
		assert!(debug.contains("42 bytes"), "{debug}");
		assert!(frame.keyframe);
	}
}
