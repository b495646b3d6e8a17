use anyhow::{Context, Result};
use lanegate::{
	cli::parse_args,
	conf::{APP_NAME, Conf, load_config},
	cv::FrameSource,
	detection::SharedDetector,
	kiosk::Kiosk,
};
use log::{critical, info, logger::AdvancedLogger};
use std::time::Duration;

/// How long leftover blocking work may hold up exit once the kiosk stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
	let args = parse_args();
	let mut cfg = load_config(args.config.as_ref())?;
	args.apply(&mut cfg);

	if let Err(e) = AdvancedLogger::init(APP_NAME, cfg.log_level()) {
		eprintln!("Logger unavailable: {e}");
	}
	info!("Loaded config version {}", cfg.version);

	let (source, detector) = open_vision(&cfg, args.video.as_deref())?;

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("Failed to build async runtime")?;

	let result = runtime.block_on(Kiosk::new(cfg).start(source, detector));
	if let Err(e) = &result {
		critical!("Kiosk stopped: {:#}", e);
	}

	runtime.shutdown_timeout(SHUTDOWN_GRACE);
	result
}

#[cfg(feature = "opencv")]
fn open_vision(cfg: &Conf, video: Option<&str>) -> Result<(Box<dyn FrameSource>, SharedDetector)> {
	use lanegate::cv::{capture::CameraSource, net::PlateNet};
	use std::sync::{Arc, Mutex};

	let source = match video {
		Some(path) => CameraSource::file(path)?,
		None => CameraSource::camera(cfg.camera.index, cfg.camera.width, cfg.camera.height)?,
	};

	let model = cfg.detector.model.to_str().context("Invalid model path")?;
	let detector = PlateNet::new(
		model,
		cfg.detector.input_size,
		cfg.detector.confidence,
		cfg.detector.nms,
	)?;

	Ok((Box::new(source), Arc::new(Mutex::new(detector))))
}

#[cfg(not(feature = "opencv"))]
fn open_vision(_cfg: &Conf, _video: Option<&str>) -> Result<(Box<dyn FrameSource>, SharedDetector)> {
	anyhow::bail!("built without the `opencv` feature: no camera or plate detector available")
}
