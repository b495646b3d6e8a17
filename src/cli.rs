use clap::Parser;
use std::path::PathBuf;

use crate::{conf::Conf, confirm::EnrollPolicy};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
	/// Read a file instead of using the camera
	#[arg(short, long)]
	pub video: Option<String>,

	/// Config file (defaults to the per-user location)
	#[arg(short, long)]
	pub config: Option<PathBuf>,

	/// Output debug information
	#[arg(short, long)]
	pub debug: bool,

	/// Frames to wait between detections
	#[arg(short, long)]
	pub rate: Option<u64>,

	/// What to do with unknown plate/credential pairs
	#[arg(short, long, value_enum)]
	pub enroll: Option<EnrollPolicy>,
}

impl Args {
	/// Command-line values take precedence over the config file.
	pub fn apply(&self, cfg: &mut Conf) {
		if self.debug {
			cfg.log_level = "debug".into();
		}
		if let Some(rate) = self.rate {
			cfg.detector.every = rate;
		}
		if let Some(enroll) = self.enroll {
			cfg.access.enroll = enroll;
		}
	}
}

pub fn parse_args() -> Args {
	Args::parse()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn overrides_config() {
		let args = Args::try_parse_from(["lanegate", "--debug", "--rate", "5", "--enroll", "never"])
			.unwrap();
		let mut cfg = Conf::default();
		args.apply(&mut cfg);

		assert_eq!(cfg.log_level, "debug");
		assert_eq!(cfg.detector.every, 5);
		assert_eq!(cfg.access.enroll, EnrollPolicy::Never);
	}

	#[test]
	fn no_flags_keep_config() {
		let args = Args::try_parse_from(["lanegate", "-v", "lane.mp4"]).unwrap();
		let mut cfg = Conf::default();
		args.apply(&mut cfg);

		assert_eq!(args.video.as_deref(), Some("lane.mp4"));
		assert_eq!(cfg, Conf::default());
	}
}
