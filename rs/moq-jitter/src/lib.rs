//! # moq-jitter: Playout buffer for Media over QUIC
//!
//! `moq-jitter` sits between a subscriber receiving video frames off the network and
//! the playback clock that renders them. Frames may arrive out of order, late, or twice;
//! the [JitterBuffer] releases them in strictly increasing [Sequence] order.
//!
//! ## Overview
//!
//! - [Frame]: A decodable unit of video identified by its group and object IDs.
//! - [FrameStore]: The ordered, deduplicating collection of pending frames.
//! - [JitterBuffer]: Gates playback until a minimum depth accumulates, then delivers one frame per read.
//! - [MetricsSubmitter]: Optional fire-and-forget sink for per-buffer counters and gauges.
//! - [JitterConfig]: CLI and file configuration for a buffer.
//!
//! ## Usage
//!
//! Clone the [JitterBuffer] into the network task and the playback task.
//! The network task calls [JitterBuffer::write] for every frame received.
//! The playback task calls [JitterBuffer::read] once per frame duration and renders whatever it gets.
mod buffer;
mod config;
mod error;
mod frame;
mod store;

pub mod metrics;

pub use buffer::*;
pub use config::*;
pub use error::*;
pub use frame::*;
pub use metrics::MetricsSubmitter;
pub use store::*;
