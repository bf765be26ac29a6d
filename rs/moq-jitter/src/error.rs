/// Errors returned when creating a [crate::JitterBuffer] or talking to the metrics aggregator.
///
/// Reading and writing frames never fails; see [crate::Read] and [crate::Write] instead.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
	#[error("frame duration must be non-zero")]
	ZeroFrameDuration,

	#[error("metrics aggregator closed")]
	MetricsClosed,
}
