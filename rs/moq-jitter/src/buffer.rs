use std::{
	collections::BTreeMap,
	sync::Arc,
	time::{Duration, SystemTime},
};

use parking_lot::Mutex;

use crate::{
	Error, Frame, FrameStore, JitterConfig, MetricsSubmitter, Sequence,
	metrics::{Event, Registration},
	required_frames,
};

/// The measurement name used for every buffer.
pub const MEASUREMENT_NAME: &str = "jitter_buffer";

/// The outcome of [JitterBuffer::write].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
	/// The frame was buffered for playback.
	Buffered,

	/// A frame with the same sequence is already buffered; the new one was discarded.
	Duplicate,

	/// A frame with the same or a newer sequence was already played; the new one was discarded.
	Late,
}

/// The outcome of [JitterBuffer::poll].
#[derive(Debug, Clone)]
pub enum Read {
	/// The oldest buffered frame.
	Frame(Frame),

	/// Playback has not started yet; the minimum depth has not been reached.
	Buffering,

	/// Playback has started but the buffer is empty.
	Underrun,
}

impl Read {
	pub fn into_frame(self) -> Option<Frame> {
		match self {
			Self::Frame(frame) => Some(frame),
			Self::Buffering | Self::Underrun => None,
		}
	}

	pub fn is_underrun(&self) -> bool {
		matches!(self, Self::Underrun)
	}
}

#[derive(Default)]
struct State {
	frames: FrameStore,

	// Latched once the minimum depth is first reached.
	playing: bool,

	// The sequence of the most recently delivered frame.
	last_read: Option<Sequence>,
}

impl State {
	fn write(&mut self, frame: Frame) -> Write {
		if self.last_read.is_some_and(|last| frame.sequence() <= last) {
			return Write::Late;
		}

		match self.frames.insert(frame) {
			true => Write::Buffered,
			false => Write::Duplicate,
		}
	}

	fn read(&mut self, required: usize) -> Read {
		if !self.playing {
			if self.frames.len() < required {
				return Read::Buffering;
			}

			self.playing = true;
		}

		match self.frames.pop_first() {
			Some(frame) => {
				self.last_read = Some(frame.sequence());
				Read::Frame(frame)
			}
			None => Read::Underrun,
		}
	}
}

struct Inner {
	state: Mutex<State>,

	namespace: String,
	frame_duration: Duration,
	min_depth: Duration,

	// ceil(min_depth / frame_duration)
	required: usize,

	metrics: Option<Registration>,
}

/// A playout buffer that reorders video frames and releases them at a steady pace.
///
/// Frames are written by the network task in any order and read by the playback clock in
/// ascending [Sequence] order. Nothing is returned until at least `min_depth` worth of frames
/// are buffered; after that each read returns the oldest frame, skipping any gaps.
/// Playback never goes back to buffering: an empty buffer is reported as an underrun.
///
/// Cloning is cheap and all clones share the same frames.
#[derive(Clone)]
pub struct JitterBuffer {
	inner: Arc<Inner>,
}

impl JitterBuffer {
	/// Create a buffer from the given config, optionally reporting metrics.
	pub fn new(config: &JitterConfig, metrics: Option<&MetricsSubmitter>) -> Result<Self, Error> {
		Self::with_params(config.namespace.clone(), config.frame_duration, config.min_depth, metrics)
	}

	pub fn with_params(
		namespace: impl Into<String>,
		frame_duration: Duration,
		min_depth: Duration,
		metrics: Option<&MetricsSubmitter>,
	) -> Result<Self, Error> {
		let required = required_frames(min_depth, frame_duration)?;
		let namespace = namespace.into();

		let metrics = metrics.map(|submitter| {
			let tags = BTreeMap::from([("namespace".to_string(), namespace.clone())]);
			submitter.register(MEASUREMENT_NAME, tags)
		});

		tracing::debug!(%namespace, ?frame_duration, ?min_depth, required, "created jitter buffer");

		Ok(Self {
			inner: Arc::new(Inner {
				state: Default::default(),
				namespace,
				frame_duration,
				min_depth,
				required,
				metrics,
			}),
		})
	}

	/// Buffer a frame received from the network.
	///
	/// Duplicates and frames older than the last read are discarded.
	/// This holds after an underrun too: a frame older than the last one played is [Write::Late]
	/// and never returned, even though the buffer is empty and playing.
	pub fn write(&self, frame: Frame) -> Write {
		let sequence = frame.sequence();
		let result = self.inner.state.lock().write(frame);

		// Every attempt counts as a write, whatever happened to the frame.
		self.record(Event::Write);

		match result {
			Write::Buffered => {}
			Write::Duplicate => tracing::trace!(namespace = %self.inner.namespace, %sequence, "duplicate frame"),
			Write::Late => {
				tracing::trace!(namespace = %self.inner.namespace, %sequence, "late frame");
				self.record(Event::Late);
			}
		}

		result
	}

	/// Return the oldest frame if playback has started, or [None].
	///
	/// Use [Self::poll] to tell whether an empty result was due to buffering or an underrun.
	pub fn read(&self) -> Option<Frame> {
		self.poll().into_frame()
	}

	/// Attempt to take the oldest frame, reporting why nothing was returned.
	pub fn poll(&self) -> Read {
		let (count, started, read) = {
			let mut state = self.inner.state.lock();
			let count = state.frames.len();
			let playing = state.playing;
			let read = state.read(self.inner.required);
			(count, !playing && state.playing, read)
		};

		if started {
			tracing::debug!(namespace = %self.inner.namespace, buffered = count, "playback started");
		}

		if let Some(metrics) = &self.inner.metrics {
			let now = SystemTime::now();
			metrics.record_at(Event::Depth(self.duration_of(count)), now);

			match &read {
				Read::Frame(_) => metrics.record_at(Event::Read, now),
				Read::Underrun => metrics.record_at(Event::Underrun, now),
				Read::Buffering => {}
			}
		}

		read
	}

	/// Return a copy of the frame the next read would return, ignoring the playback gate.
	pub fn peek(&self) -> Option<Frame> {
		self.inner.state.lock().frames.first().cloned()
	}

	/// Discard all buffered frames, returning how many were dropped.
	///
	/// Playback stays started; the next reads will underrun until new frames arrive.
	pub fn clear(&self) -> usize {
		let count = self.inner.state.lock().frames.clear();

		if count > 0 {
			tracing::debug!(namespace = %self.inner.namespace, count, "flushed frames");
			self.record(Event::Flushed(count as u64));
		}

		count
	}

	/// The number of buffered frames.
	pub fn len(&self) -> usize {
		self.inner.state.lock().frames.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.state.lock().frames.is_empty()
	}

	/// The buffered duration: the number of frames multiplied by the frame duration.
	pub fn depth(&self) -> Duration {
		self.duration_of(self.len())
	}

	/// Whether the minimum depth was reached and playback has started.
	pub fn is_playing(&self) -> bool {
		self.inner.state.lock().playing
	}

	/// The number of frames needed before playback starts.
	pub fn required(&self) -> usize {
		self.inner.required
	}

	pub fn frame_duration(&self) -> Duration {
		self.inner.frame_duration
	}

	pub fn min_depth(&self) -> Duration {
		self.inner.min_depth
	}

	pub fn namespace(&self) -> &str {
		&self.inner.namespace
	}

	fn duration_of(&self, count: usize) -> Duration {
		let count = u32::try_from(count).unwrap_or(u32::MAX);
		self.inner.frame_duration.checked_mul(count).unwrap_or(Duration::MAX)
	}

	fn record(&self, event: Event) {
		if let Some(metrics) = &self.inner.metrics {
			metrics.record(event);
		}
	}
}
