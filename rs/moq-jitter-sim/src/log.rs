use clap::Args;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use tracing::Level;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[serde_as]
#[derive(Args, Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Log {
	/// The level of logging to output, overridden per-module by RUST_LOG.
	#[arg(id = "log-level", long = "log-level", env = "MOQ_LOG_LEVEL", default_value = "info")]
	#[serde_as(as = "DisplayFromStr")]
	pub level: Level,
}

impl Default for Log {
	fn default() -> Self {
		Self { level: Level::INFO }
	}
}

impl Log {
	pub fn init(&self) {
		let filter = EnvFilter::builder()
			.with_default_directive(LevelFilter::from_level(self.level).into())
			.from_env_lossy();

		let logger = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

		tracing_subscriber::registry().with(filter).with(logger).init();
	}
}
