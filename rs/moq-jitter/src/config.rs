use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Configuration for a [crate::JitterBuffer].
///
/// Can be provided on the command line or deserialized from a config file.
#[derive(Args, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct JitterConfig {
	/// The namespace used to tag this buffer's metrics, typically the track name.
	#[arg(
		id = "jitter-namespace",
		long = "jitter-namespace",
		env = "MOQ_JITTER_NAMESPACE",
		default_value = "video"
	)]
	pub namespace: String,

	/// The nominal duration of a single frame, ex. 33ms for 30fps.
	#[arg(
		id = "jitter-frame-duration",
		long = "jitter-frame-duration",
		env = "MOQ_JITTER_FRAME_DURATION",
		default_value = "33ms",
		value_parser = humantime::parse_duration
	)]
	#[serde(with = "humantime_serde")]
	pub frame_duration: Duration,

	/// The amount of media to buffer before playback starts.
	///
	/// Higher values add latency but absorb more network jitter.
	#[arg(
		id = "jitter-min-depth",
		long = "jitter-min-depth",
		env = "MOQ_JITTER_MIN_DEPTH",
		default_value = "200ms",
		value_parser = humantime::parse_duration
	)]
	#[serde(with = "humantime_serde")]
	pub min_depth: Duration,
}

impl Default for JitterConfig {
	fn default() -> Self {
		Self {
			namespace: "video".to_string(),
			frame_duration: Duration::from_millis(33),
			min_depth: Duration::from_millis(200),
		}
	}
}

impl JitterConfig {
	/// A config for the given frame rate.
	pub fn from_fps(fps: u32, min_depth: Duration) -> Self {
		Self {
			frame_duration: Duration::from_secs(1) / fps.max(1),
			min_depth,
			..Default::default()
		}
	}

	pub fn validate(&self) -> Result<(), Error> {
		required_frames(self.min_depth, self.frame_duration).map(|_| ())
	}

	/// The number of frames that must be buffered before playback starts.
	pub fn required_frames(&self) -> Result<usize, Error> {
		required_frames(self.min_depth, self.frame_duration)
	}
}

/// Convert a depth into a frame count, rounding up: `ceil(min_depth / frame_duration)`.
pub fn required_frames(min_depth: Duration, frame_duration: Duration) -> Result<usize, Error> {
	let frame = frame_duration.as_nanos();
	if frame == 0 {
		return Err(Error::ZeroFrameDuration);
	}

	let count = min_depth.as_nanos().div_ceil(frame);
	Ok(usize::try_from(count).unwrap_or(usize::MAX))
}
