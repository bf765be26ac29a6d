use std::time::Duration;

use bytes::Bytes;
use moq_jitter::{
	Frame, JitterBuffer, MetricsSubmitter, Read, Write,
	metrics::{Exporter, TracingExporter},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::{task::JoinSet, time::MissedTickBehavior};

use crate::Config;

/// What happened to the frames sent by the simulated network.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Network {
	/// Frames sent, not counting duplicates.
	pub sent: u64,
	/// Frames that were never delivered.
	pub lost: u64,
	pub buffered: u64,
	pub duplicates: u64,
	/// Frames that arrived after a newer frame was played.
	pub late: u64,
}

/// What the playback clock observed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Playback {
	pub rendered: u64,
	/// Ticks spent waiting for the minimum depth.
	pub buffering: u64,
	pub underruns: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
	pub network: Network,
	pub playback: Playback,
}

/// Run a full simulation: a jittery producer and a fixed-rate playback clock sharing one buffer.
pub async fn run(config: &Config) -> anyhow::Result<Summary> {
	run_with_exporter(config, TracingExporter).await
}

/// Like [run], but metrics (when enabled) go to the given exporter.
pub async fn run_with_exporter(config: &Config, exporter: impl Exporter) -> anyhow::Result<Summary> {
	let metrics = config.metrics.enabled.then(|| {
		let (submitter, aggregator) = MetricsSubmitter::new();
		let task = tokio::spawn(aggregator.with_exporter(exporter).run(config.metrics.interval));
		(submitter, task)
	});

	let buffer = JitterBuffer::new(&config.jitter, metrics.as_ref().map(|(submitter, _)| submitter))?;
	tracing::info!(
		namespace = %buffer.namespace(),
		frame_duration = ?buffer.frame_duration(),
		min_depth = ?buffer.min_depth(),
		required = buffer.required(),
		"starting simulation"
	);

	let network = tokio::spawn(produce(buffer.clone(), config.clone()));
	let summary = play(buffer, network).await?;

	if let Some((submitter, task)) = metrics {
		// The aggregator exits once every handle is gone, exporting what's left.
		drop(submitter);
		task.await?;
	}

	Ok(summary)
}

/// Send every frame through a simulated network with random delay, loss, and duplication.
async fn produce(buffer: JitterBuffer, config: Config) -> Network {
	let sim = config.sim;
	let mut rng = match sim.seed {
		Some(seed) => StdRng::seed_from_u64(seed),
		None => StdRng::from_os_rng(),
	};

	let max_jitter = u64::try_from(sim.max_jitter.as_nanos()).unwrap_or(u64::MAX);
	let mut ticker = tokio::time::interval(config.jitter.frame_duration);
	let mut inflight = JoinSet::new();
	let mut network = Network::default();

	for index in 0..sim.frames {
		ticker.tick().await;

		let group = index / sim.gop as u64;
		let object = (index % sim.gop as u64) as u16;
		network.sent += 1;

		if rng.random_bool(sim.loss) {
			tracing::trace!(group, object, "lost frame");
			network.lost += 1;
			continue;
		}

		let copies = if rng.random_bool(sim.duplicate) { 2 } else { 1 };
		for _ in 0..copies {
			let delay = Duration::from_nanos(rng.random_range(0..=max_jitter));
			let frame = Frame::new(group, object, payload(object));
			let buffer = buffer.clone();

			inflight.spawn(async move {
				tokio::time::sleep(delay).await;
				buffer.write(frame)
			});
		}
	}

	while let Some(res) = inflight.join_next().await {
		match res {
			Ok(Write::Buffered) => network.buffered += 1,
			Ok(Write::Duplicate) => network.duplicates += 1,
			Ok(Write::Late) => network.late += 1,
			Err(err) => tracing::warn!(%err, "delivery task failed"),
		}
	}

	tracing::debug!(?network, "network finished");
	network
}

/// Pull one frame per frame duration until the network is done and the buffer runs dry.
async fn play(buffer: JitterBuffer, mut network: tokio::task::JoinHandle<Network>) -> anyhow::Result<Summary> {
	let mut ticker = tokio::time::interval(buffer.frame_duration());
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

	let mut playback = Playback::default();
	let mut finished = None;

	loop {
		tokio::select! {
			res = &mut network, if finished.is_none() => finished = Some(res?),
			_ = ticker.tick() => match buffer.poll() {
				Read::Frame(frame) => {
					tracing::trace!(sequence = %frame.sequence(), size = frame.payload.len(), "render");
					playback.rendered += 1;
				}
				// Nothing more is coming; the stream was too short to ever start.
				Read::Buffering if finished.is_some() => break,
				Read::Buffering => playback.buffering += 1,
				Read::Underrun if finished.is_some() => break,
				Read::Underrun => {
					tracing::debug!(depth = ?buffer.depth(), "underrun");
					playback.underruns += 1;
				}
			},
		}
	}

	let network = finished.unwrap_or_default();
	Ok(Summary { network, playback })
}

// Keyframes are bigger, which matters to nobody but looks realistic in traces.
fn payload(object: u16) -> Bytes {
	let size = if object == 0 { 4096 } else { 512 };
	Bytes::from(vec![0u8; size])
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex};

	use moq_jitter::metrics::Measurement;

	use crate::{MetricsConfig, SimConfig};

	#[derive(Clone, Default)]
	struct Exported(Arc<Mutex<Vec<Measurement>>>);

	impl Exporter for Exported {
		fn export(&mut self, measurements: &[Measurement]) {
			self.0.lock().unwrap().extend_from_slice(measurements);
		}
	}

	fn config(sim: SimConfig) -> Config {
		let mut config = Config {
			sim,
			..Default::default()
		};
		config.jitter.frame_duration = Duration::from_millis(10);
		config.jitter.min_depth = Duration::from_millis(60);
		config
	}

	#[tokio::test(start_paused = true)]
	async fn perfect_network() {
		let config = config(SimConfig {
			frames: 100,
			max_jitter: Duration::ZERO,
			loss: 0.0,
			duplicate: 0.0,
			seed: Some(1),
			..Default::default()
		});

		let summary = run(&config).await.unwrap();
		assert_eq!(summary.network.sent, 100);
		assert_eq!(summary.network.buffered, 100);
		assert_eq!(summary.network.late, 0);
		assert_eq!(summary.playback.rendered, 100);
		assert_eq!(summary.playback.underruns, 0);
		assert!(summary.playback.buffering > 0);
	}

	#[tokio::test(start_paused = true)]
	async fn jittery_network() {
		let config = config(SimConfig {
			frames: 500,
			max_jitter: Duration::from_millis(100),
			loss: 0.05,
			duplicate: 0.1,
			seed: Some(42),
			..Default::default()
		});

		let summary = run(&config).await.unwrap();
		let network = summary.network;

		// Every buffered frame is rendered exactly once, the rest are lost or late.
		assert_eq!(network.sent, 500);
		assert!(network.buffered <= network.sent - network.lost);
		assert!(network.buffered + network.duplicates + network.late >= network.sent - network.lost);
		assert_eq!(summary.playback.rendered, network.buffered);
	}

	#[tokio::test(start_paused = true)]
	async fn too_short_to_start() {
		let config = config(SimConfig {
			frames: 3,
			max_jitter: Duration::ZERO,
			loss: 0.0,
			duplicate: 0.0,
			..Default::default()
		});

		let summary = run(&config).await.unwrap();
		assert_eq!(summary.playback.rendered, 0);
		assert_eq!(summary.network.buffered, 3);
	}

	#[tokio::test(start_paused = true)]
	async fn with_metrics() {
		let mut config = config(SimConfig {
			frames: 20,
			seed: Some(3),
			..Default::default()
		});
		config.metrics = MetricsConfig {
			enabled: true,
			interval: Duration::from_millis(50),
		};

		let exported = Exported::default();
		let summary = run_with_exporter(&config, exported.clone()).await.unwrap();
		assert_eq!(summary.network.sent, 20);

		// The buffer unregisters when the run ends, flushing its final counters.
		let exported = exported.0.lock().unwrap();
		let last = exported.last().expect("nothing exported");
		assert_eq!(last.name, moq_jitter::MEASUREMENT_NAME);
		assert_eq!(last.tags["namespace"], config.jitter.namespace);

		let network = summary.network;
		assert!(last.counters.writes > 0);
		assert_eq!(last.counters.writes, network.buffered + network.duplicates + network.late);
		assert_eq!(last.counters.late, network.late);
		assert!(last.counters.reads > 0);
		assert_eq!(last.counters.reads, summary.playback.rendered);
	}
}
