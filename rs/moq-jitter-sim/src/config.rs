use std::{ffi::OsString, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Args, Parser};
use moq_jitter::JitterConfig;
use serde::{Deserialize, Serialize};

use crate::Log;

#[derive(Parser, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
#[command(version, about = "Simulate a jittery network feeding a video playout buffer")]
pub struct Config {
	/// Load the configuration from a TOML file instead of the command line.
	#[arg(long)]
	#[serde(skip)]
	pub file: Option<PathBuf>,

	#[command(flatten)]
	pub log: Log,

	#[command(flatten)]
	pub jitter: JitterConfig,

	#[command(flatten)]
	pub sim: SimConfig,

	#[command(flatten)]
	pub metrics: MetricsConfig,
}

impl Config {
	/// Parse the command line, load the config file if any, and initialize logging.
	pub fn load() -> anyhow::Result<Self> {
		let config = Self::load_from(std::env::args_os())?;
		config.log.init();
		Ok(config)
	}

	pub fn load_from<I, T>(args: I) -> anyhow::Result<Self>
	where
		I: IntoIterator<Item = T>,
		T: Into<OsString> + Clone,
	{
		let mut config = Self::try_parse_from(args)?;

		if let Some(file) = config.file.take() {
			let contents = std::fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
			config = toml::from_str(&contents).with_context(|| format!("failed to parse {}", file.display()))?;
			config.file = Some(file);
		}

		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> anyhow::Result<()> {
		self.jitter.validate()?;
		self.sim.validate()?;
		Ok(())
	}
}

/// How the simulated network mangles frames.
#[derive(Args, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimConfig {
	/// The number of frames to produce.
	#[arg(long = "sim-frames", default_value_t = 300)]
	pub frames: u64,

	/// The number of frames in each group.
	#[arg(long = "sim-gop", default_value_t = 30)]
	pub gop: u16,

	/// Each frame is delayed by a random amount up to this value.
	#[arg(long = "sim-max-jitter", default_value = "80ms", value_parser = humantime::parse_duration)]
	#[serde(with = "humantime_serde")]
	pub max_jitter: Duration,

	/// The probability that a frame is never delivered.
	#[arg(long = "sim-loss", default_value_t = 0.01)]
	pub loss: f64,

	/// The probability that a frame is delivered twice.
	#[arg(long = "sim-duplicate", default_value_t = 0.02)]
	pub duplicate: f64,

	/// Seed the random number generator for a reproducible run.
	#[arg(long = "sim-seed")]
	pub seed: Option<u64>,
}

impl Default for SimConfig {
	fn default() -> Self {
		Self {
			frames: 300,
			gop: 30,
			max_jitter: Duration::from_millis(80),
			loss: 0.01,
			duplicate: 0.02,
			seed: None,
		}
	}
}

impl SimConfig {
	pub fn validate(&self) -> anyhow::Result<()> {
		anyhow::ensure!(self.gop > 0, "gop must be at least 1");
		anyhow::ensure!((0.0..=1.0).contains(&self.loss), "loss must be between 0 and 1");
		anyhow::ensure!(
			(0.0..=1.0).contains(&self.duplicate),
			"duplicate must be between 0 and 1"
		);
		Ok(())
	}
}

#[derive(Args, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetricsConfig {
	/// Report buffer metrics to the log.
	#[arg(long = "metrics")]
	pub enabled: bool,

	/// How often metrics are exported.
	#[arg(long = "metrics-interval", default_value = "5s", value_parser = humantime::parse_duration)]
	#[serde(with = "humantime_serde")]
	pub interval: Duration,
}

impl Default for MetricsConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			interval: Duration::from_secs(5),
		}
	}
}
