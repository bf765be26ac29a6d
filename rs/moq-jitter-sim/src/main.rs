//! Simulate a jittery network feeding a [moq_jitter::JitterBuffer].
//!
//! A producer task sends frames at a fixed rate through a fake network that delays,
//! drops, and duplicates them. A playback task reads one frame per frame duration.
//! Tune the buffer's minimum depth and watch the underruns go away.

mod config;
mod log;
mod sim;

pub use config::*;
pub use log::*;
pub use sim::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::load()?;

	let summary = sim::run(&config).await?;
	let Summary { network, playback } = summary;

	tracing::info!(
		sent = network.sent,
		lost = network.lost,
		duplicates = network.duplicates,
		late = network.late,
		rendered = playback.rendered,
		buffering = playback.buffering,
		underruns = playback.underruns,
		"simulation complete"
	);

	Ok(())
}
