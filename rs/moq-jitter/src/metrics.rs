//! Fire-and-forget metrics for jitter buffers.
//!
//! Each buffer registers a [Measurement] with a shared [MetricsSubmitter] and then emits
//! events without waiting on anything: sending is a synchronous push onto an unbounded channel.
//! A single [MetricsAggregator] task owns every measurement, keeps the cumulative counters,
//! and periodically hands the accumulated points to an [Exporter].
//!
//! Exporting to a real time-series database is left to a custom [Exporter].

use std::{
	collections::{BTreeMap, HashMap},
	fmt,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::{Duration, SystemTime},
};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::Error;

/// The smallest export interval the aggregator will honor.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A unique ID for a registered measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MeasurementId(u64);

impl fmt::Display for MeasurementId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Something that happened inside a jitter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
	/// A frame was written (including duplicates).
	Write,
	/// A frame was delivered to the playback clock.
	Read,
	/// A frame arrived after a newer frame had already been delivered.
	Late,
	/// Playback had started but there was nothing to deliver.
	Underrun,
	/// The buffered duration observed by a read.
	Depth(Duration),
	/// This many frames were discarded by a flush.
	Flushed(u64),
}

/// A recorded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
	Count(u64),
	Duration(#[serde(with = "humantime_serde")] Duration),
}

/// A single timestamped value for a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Point {
	pub field: &'static str,
	pub value: Value,
	#[serde(with = "humantime_serde")]
	pub timestamp: SystemTime,
}

/// Cumulative counters for a single buffer, never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
	pub writes: u64,
	pub reads: u64,
	pub late: u64,
	pub underruns: u64,
	pub flushed: u64,
}

/// The metrics for a single buffer, as seen by the aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
	pub id: MeasurementId,
	pub name: String,
	pub tags: BTreeMap<String, String>,
	pub counters: Counters,

	/// Points recorded since the last export.
	pub points: Vec<Point>,
}

impl Measurement {
	fn new(id: MeasurementId, name: String, tags: BTreeMap<String, String>) -> Self {
		Self {
			id,
			name,
			tags,
			counters: Counters::default(),
			points: Vec::new(),
		}
	}

	fn record(&mut self, event: Event, timestamp: SystemTime) {
		let (field, value) = match event {
			Event::Write => {
				self.counters.writes += 1;
				("writes", Value::Count(self.counters.writes))
			}
			Event::Read => {
				self.counters.reads += 1;
				("reads", Value::Count(self.counters.reads))
			}
			Event::Late => {
				self.counters.late += 1;
				("late", Value::Count(self.counters.late))
			}
			Event::Underrun => {
				self.counters.underruns += 1;
				("underruns", Value::Count(self.counters.underruns))
			}
			Event::Depth(depth) => ("current_depth", Value::Duration(depth)),
			Event::Flushed(count) => {
				self.counters.flushed += count;
				("flushed", Value::Count(self.counters.flushed))
			}
		};

		self.points.push(Point {
			field,
			value,
			timestamp,
		});
	}
}

/// Receives batches of measurements from the aggregator.
///
/// Called from the aggregator task, so implementations should not block for long.
pub trait Exporter: Send + 'static {
	fn export(&mut self, measurements: &[Measurement]);
}

/// Logs every exported point via [tracing], serialized as JSON.
#[derive(Debug, Default)]
pub struct TracingExporter;

impl Exporter for TracingExporter {
	fn export(&mut self, measurements: &[Measurement]) {
		for measurement in measurements {
			match serde_json::to_string(&measurement.points) {
				Ok(points) => tracing::info!(
					measurement = %measurement.name,
					id = %measurement.id,
					tags = ?measurement.tags,
					%points,
					"metrics"
				),
				Err(err) => tracing::warn!(%err, id = %measurement.id, "failed to serialize metrics"),
			}
		}
	}
}

enum Command {
	Register {
		id: MeasurementId,
		name: String,
		tags: BTreeMap<String, String>,
	},
	Unregister {
		id: MeasurementId,
	},
	Record {
		id: MeasurementId,
		event: Event,
		timestamp: SystemTime,
	},
	Snapshot {
		reply: oneshot::Sender<Vec<Measurement>>,
	},
	Submit {
		reply: oneshot::Sender<()>,
	},
}

/// A cheaply cloneable handle used to register measurements.
///
/// Can be shared between any number of buffers and threads.
#[derive(Clone)]
pub struct MetricsSubmitter {
	tx: mpsc::UnboundedSender<Command>,
	next_id: Arc<AtomicU64>,
}

impl MetricsSubmitter {
	/// Create a submitter and the aggregator that must be run to process its events.
	pub fn new() -> (Self, MetricsAggregator) {
		let (tx, rx) = mpsc::unbounded_channel();
		let submitter = Self {
			tx,
			next_id: Default::default(),
		};

		(submitter, MetricsAggregator::new(rx))
	}

	/// Register a new measurement, unregistered when the returned handle is dropped.
	pub fn register(&self, name: impl Into<String>, tags: BTreeMap<String, String>) -> Registration {
		let id = MeasurementId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.send(Command::Register {
			id,
			name: name.into(),
			tags,
		});

		Registration {
			id,
			submitter: self.clone(),
		}
	}

	/// Return a copy of every registered measurement.
	pub async fn snapshot(&self) -> Result<Vec<Measurement>, Error> {
		let (reply, rx) = oneshot::channel();
		self.send(Command::Snapshot { reply });
		rx.await.map_err(|_| Error::MetricsClosed)
	}

	/// Export all pending points now instead of waiting for the next interval.
	pub async fn submit(&self) -> Result<(), Error> {
		let (reply, rx) = oneshot::channel();
		self.send(Command::Submit { reply });
		rx.await.map_err(|_| Error::MetricsClosed)
	}

	// Never blocks; if the aggregator is gone the event is dropped.
	fn send(&self, command: Command) {
		let _ = self.tx.send(command);
	}
}

/// A registered measurement, used to record events.
///
/// Dropping it removes the measurement from the aggregator after exporting any pending points.
pub struct Registration {
	id: MeasurementId,
	submitter: MetricsSubmitter,
}

impl Registration {
	pub fn id(&self) -> MeasurementId {
		self.id
	}

	/// Record an event, timestamped now.
	pub fn record(&self, event: Event) {
		self.record_at(event, SystemTime::now());
	}

	pub fn record_at(&self, event: Event, timestamp: SystemTime) {
		self.submitter.send(Command::Record {
			id: self.id,
			event,
			timestamp,
		});
	}
}

impl Drop for Registration {
	fn drop(&mut self) {
		self.submitter.send(Command::Unregister { id: self.id });
	}
}

/// Owns every measurement and periodically exports them.
pub struct MetricsAggregator {
	rx: mpsc::UnboundedReceiver<Command>,
	measurements: HashMap<MeasurementId, Measurement>,
	exporter: Box<dyn Exporter>,
}

impl MetricsAggregator {
	fn new(rx: mpsc::UnboundedReceiver<Command>) -> Self {
		Self {
			rx,
			measurements: HashMap::new(),
			exporter: Box::new(TracingExporter),
		}
	}

	/// Replace the default [TracingExporter].
	pub fn with_exporter(mut self, exporter: impl Exporter) -> Self {
		self.exporter = Box::new(exporter);
		self
	}

	/// Process events until every [MetricsSubmitter] is dropped, exporting on each interval.
	pub async fn run(mut self, interval: Duration) {
		let mut interval = tokio::time::interval(interval.max(MIN_INTERVAL));
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				command = self.rx.recv() => match command {
					Some(command) => self.handle(command),
					None => break,
				},
				_ = interval.tick() => self.export(),
			}
		}

		self.export();
		tracing::debug!("metrics aggregator closed");
	}

	fn handle(&mut self, command: Command) {
		match command {
			Command::Register { id, name, tags } => {
				tracing::trace!(%id, measurement = %name, "registered measurement");
				let measurement = Measurement::new(id, name, tags);
				if self.measurements.insert(id, measurement).is_some() {
					tracing::warn!(%id, "measurement registered twice");
				}
			}
			Command::Unregister { id } => match self.measurements.remove(&id) {
				Some(measurement) => {
					if !measurement.points.is_empty() {
						self.exporter.export(std::slice::from_ref(&measurement));
					}
					tracing::trace!(%id, "unregistered measurement");
				}
				None => tracing::warn!(%id, "unregister for unknown measurement"),
			},
			Command::Record { id, event, timestamp } => match self.measurements.get_mut(&id) {
				Some(measurement) => measurement.record(event, timestamp),
				None => tracing::warn!(%id, ?event, "record for unknown measurement"),
			},
			Command::Snapshot { reply } => {
				let mut snapshot: Vec<_> = self.measurements.values().cloned().collect();
				snapshot.sort_by_key(|measurement| measurement.id);
				let _ = reply.send(snapshot);
			}
			Command::Submit { reply } => {
				self.export();
				let _ = reply.send(());
			}
		}
	}

	fn export(&mut self) {
		let mut batch: Vec<_> = self
			.measurements
			.values_mut()
			.filter(|measurement| !measurement.points.is_empty())
			.map(|measurement| {
				let points = std::mem::take(&mut measurement.points);
				Measurement {
					points,
					..measurement.clone()
				}
			})
			.collect();

		if batch.is_empty() {
			return;
		}

		batch.sort_by_key(|measurement| measurement.id);
		self.exporter.export(&batch);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Collects exported batches so tests can inspect them.
	#[derive(Clone, Default)]
	struct Capture(Arc<parking_lot::Mutex<Vec<Measurement>>>);

	impl Exporter for Capture {
		fn export(&mut self, measurements: &[Measurement]) {
			self.0.lock().extend_from_slice(measurements);
		}
	}

	fn tags(namespace: &str) -> BTreeMap<String, String> {
		BTreeMap::from([("namespace".to_string(), namespace.to_string())])
	}

	#[tokio::test]
	async fn counters_are_cumulative() {
		let (submitter, aggregator) = MetricsSubmitter::new();
		tokio::spawn(aggregator.run(Duration::from_secs(3600)));

		let registration = submitter.register("jitter_buffer", tags("a"));
		registration.record(Event::Write);
		registration.record(Event::Write);
		registration.record(Event::Underrun);
		registration.record(Event::Depth(Duration::from_millis(100)));

		let snapshot = submitter.snapshot().await.unwrap();
		assert_eq!(snapshot.len(), 1);

		let measurement = &snapshot[0];
		assert_eq!(measurement.name, "jitter_buffer");
		assert_eq!(measurement.tags["namespace"], "a");
		assert_eq!(measurement.counters.writes, 2);
		assert_eq!(measurement.counters.underruns, 1);

		let values: Vec<_> = measurement.points.iter().map(|p| (p.field, p.value)).collect();
		assert_eq!(
			values,
			vec![
				("writes", Value::Count(1)),
				("writes", Value::Count(2)),
				("underruns", Value::Count(1)),
				("current_depth", Value::Duration(Duration::from_millis(100))),
			]
		);
	}

	#[tokio::test]
	async fn flushed_accumulates_counts() {
		let (submitter, aggregator) = MetricsSubmitter::new();
		tokio::spawn(aggregator.run(Duration::from_secs(3600)));

		let registration = submitter.register("jitter_buffer", tags("a"));
		registration.record(Event::Flushed(3));
		registration.record(Event::Flushed(2));

		let snapshot = submitter.snapshot().await.unwrap();
		assert_eq!(snapshot[0].counters.flushed, 5);
		assert_eq!(snapshot[0].points.last().unwrap().value, Value::Count(5));
	}

	#[tokio::test]
	async fn unregister_on_drop() {
		let capture = Capture::default();
		let (submitter, aggregator) = MetricsSubmitter::new();
		tokio::spawn(aggregator.with_exporter(capture.clone()).run(Duration::from_secs(3600)));

		let a = submitter.register("jitter_buffer", tags("a"));
		let b = submitter.register("jitter_buffer", tags("b"));
		assert_ne!(a.id(), b.id());
		a.record(Event::Read);
		drop(a);

		let snapshot = submitter.snapshot().await.unwrap();
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].id, b.id());

		// Pending points are exported on the way out.
		let exported = capture.0.lock().clone();
		assert_eq!(exported.len(), 1);
		assert_eq!(exported[0].tags["namespace"], "a");
		assert_eq!(exported[0].points[0].field, "reads");
	}

	#[tokio::test]
	async fn submit_exports_and_clears() {
		let capture = Capture::default();
		let (submitter, aggregator) = MetricsSubmitter::new();
		tokio::spawn(aggregator.with_exporter(capture.clone()).run(Duration::from_secs(3600)));

		let registration = submitter.register("jitter_buffer", tags("a"));
		let idle = submitter.register("jitter_buffer", tags("idle"));
		registration.record(Event::Write);
		submitter.submit().await.unwrap();

		// Measurements without points are not exported.
		let exported = capture.0.lock().clone();
		assert_eq!(exported.len(), 1);
		assert_eq!(exported[0].id, registration.id());
		assert_eq!(exported[0].points.len(), 1);

		// Points are cleared, counters are not.
		let snapshot = submitter.snapshot().await.unwrap();
		assert!(snapshot.iter().all(|m| m.points.is_empty()));
		assert_eq!(snapshot[0].counters.writes, 1);
		drop(idle);
	}

	#[tokio::test(start_paused = true)]
	async fn exports_on_interval() {
		let capture = Capture::default();
		let (submitter, aggregator) = MetricsSubmitter::new();
		tokio::spawn(aggregator.with_exporter(capture.clone()).run(Duration::from_secs(5)));

		let registration = submitter.register("jitter_buffer", tags("a"));
		registration.record(Event::Write);
		assert!(capture.0.lock().is_empty());

		tokio::time::sleep(Duration::from_secs(6)).await;
		assert_eq!(capture.0.lock().len(), 1);
	}

	#[tokio::test]
	async fn snapshot_fails_when_closed() {
		let (submitter, aggregator) = MetricsSubmitter::new();
		drop(aggregator);

		// Recording after the aggregator is gone is silently ignored.
		let registration = submitter.register("jitter_buffer", tags("a"));
		registration.record(Event::Write);

		assert_eq!(submitter.snapshot().await.unwrap_err(), Error::MetricsClosed);
	}

	#[test]
	fn points_serialize_as_json() {
		let point = Point {
			field: "current_depth",
			value: Value::Duration(Duration::from_millis(200)),
			timestamp: SystemTime::UNIX_EPOCH,
		};
		let json = serde_json::to_string(&point).unwrap();
		assert!(json.starts_with(r#"{"field":"current_depth","value":"200ms","timestamp":"1970-01-01T00:00:00"#), "{json}");

		let count = serde_json::to_string(&Value::Count(7)).unwrap();
		assert_eq!(count, "7");
	}
}
