mod settings;

use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{Receiver, Sender};

use facecapture_core::camera::domain::frame_source::{FrameSource, FrameSourceConfig};
use facecapture_core::camera::infrastructure::ffmpeg_frame_source::FfmpegFrameSource;
use facecapture_core::camera::infrastructure::image_sequence_frame_source::ImageSequenceFrameSource;
use facecapture_core::capture::capture_runtime::{CaptureRuntime, RuntimeOptions, UserCommand};
use facecapture_core::capture::domain::capture_gate::GatePolicy;
use facecapture_core::capture::domain::session::{Phase, SessionSnapshot};
use facecapture_core::capture::session_logger::StdoutSessionLogger;
use facecapture_core::capture::session_state_machine::{SessionConfig, SessionStateMachine};
use facecapture_core::detection::domain::detection_dispatch::DetectionEvent;
use facecapture_core::detection::domain::detection_engine::{
    DetectionEngine, EngineOptions, ModelKind,
};
use facecapture_core::detection::infrastructure::detection_worker::DetectionWorker;
use facecapture_core::detection::infrastructure::onnx_blazeface_engine::{
    ModelLocator, OnnxBlazefaceEngine,
};
use facecapture_core::persistence::domain::capture_store::CaptureStore;
use facecapture_core::persistence::infrastructure::image_file_capture_store::ImageFileCaptureStore;
use facecapture_core::shared::constants::{BLAZEFACE_FULL_MODEL_NAME, BLAZEFACE_SHORT_MODEL_NAME};
use facecapture_core::shared::model_resolver;

use settings::{DetectorModel, Settings};

/// Hands-free face capture: watches a camera and saves a still as soon as a
/// face is confidently detected.
#[derive(Parser)]
#[command(name = "facecapture")]
struct Cli {
    /// Camera device or stream URL passed to ffmpeg (e.g. /dev/video0).
    #[arg(long, default_value = "/dev/video0", conflicts_with = "frames_dir")]
    camera: String,

    /// ffmpeg input format for the camera (e.g. v4l2, avfoundation, dshow).
    #[arg(long)]
    input_format: Option<String>,

    /// Replay a directory of still images instead of a live camera.
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// Directory captures are saved to.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Best-face confidence that triggers a capture (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Faces scoring below this are ignored by the detector (0.0-1.0).
    #[arg(long)]
    min_confidence: Option<f64>,

    /// How long the captured photo is held before the result is shown.
    #[arg(long)]
    dwell_ms: Option<u64>,

    /// Detector model: fast or accurate.
    #[arg(long)]
    model: Option<String>,

    /// File name (without extension) the capture is stored under.
    #[arg(long)]
    storage_key: Option<String>,

    /// Directory searched for model files before the cache and download.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Base URL model files are downloaded from.
    #[arg(long)]
    model_url: Option<String>,

    /// Start immediately and exit after the first capture.
    #[arg(long)]
    auto: bool,

    /// Don't mirror the preview and capture.
    #[arg(long)]
    no_mirror: bool,

    /// Persist the effective options as the new defaults.
    #[arg(long)]
    save_settings: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = apply_overrides(Settings::load(), &cli)?;
    validate(&cli, &settings)?;
    if cli.save_settings {
        settings.save();
    }

    let output_dir = settings
        .output_dir
        .clone()
        .unwrap_or_else(Settings::default_output_dir);
    let store = ImageFileCaptureStore::new(output_dir.clone());
    if let Ok(Some(previous)) = store.load(&settings.storage_key) {
        log::info!(
            "Previous capture found ({}x{}) and will be replaced",
            previous.width(),
            previous.height()
        );
    }

    let (worker, events) = spawn_detection(&cli, &settings);
    let submitter = worker.submitter();

    let machine = SessionStateMachine::new(
        SessionConfig {
            policy: GatePolicy::new(settings.accept_threshold),
            dwell: Duration::from_millis(settings.dwell_ms),
            storage_key: settings.storage_key.clone(),
        },
        build_frame_source(&cli, &settings),
        Box::new(store),
        Arc::new(submitter.clone()),
    );
    let mut runtime = CaptureRuntime::new(
        machine,
        events,
        Box::new(StdoutSessionLogger::new()),
        RuntimeOptions { auto: cli.auto },
    )
    .with_submitter(submitter);

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    if !cli.auto {
        eprintln!("Commands: [s]tart, [c]ancel, [r]eset, [q]uit");
        spawn_command_reader(cmd_tx.clone());
    }

    let completed = runtime.run(&cmd_rx, render)?;
    drop(cmd_tx);
    drop(runtime);
    worker.shutdown();

    if completed > 0 {
        let path = output_dir.join(format!("{}.jpg", settings.storage_key));
        log::info!("Capture written to {}", path.display());
    }
    Ok(())
}

fn apply_overrides(mut settings: Settings, cli: &Cli) -> Result<Settings, Box<dyn std::error::Error>> {
    if let Some(v) = cli.confidence {
        settings.accept_threshold = v;
    }
    if let Some(v) = cli.min_confidence {
        settings.min_confidence = v;
    }
    if let Some(v) = cli.dwell_ms {
        settings.dwell_ms = v;
    }
    if let Some(model) = &cli.model {
        settings.model = DetectorModel::from(model.parse::<ModelKind>()?);
    }
    if let Some(key) = &cli.storage_key {
        settings.storage_key = key.clone();
    }
    if let Some(dir) = &cli.output_dir {
        settings.output_dir = Some(dir.clone());
    }
    if let Some(url) = &cli.model_url {
        settings.model_url = Some(url.clone());
    }
    if cli.no_mirror {
        settings.mirrored = false;
    }
    Ok(settings)
}

fn validate(cli: &Cli, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&settings.accept_threshold) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            settings.accept_threshold
        )
        .into());
    }
    if !(0.0..=1.0).contains(&settings.min_confidence) {
        return Err(format!(
            "Min confidence must be between 0.0 and 1.0, got {}",
            settings.min_confidence
        )
        .into());
    }
    if settings.min_confidence > settings.accept_threshold {
        log::warn!(
            "Min confidence {} is above the capture threshold {}; only faces above {} are reported",
            settings.min_confidence,
            settings.accept_threshold,
            settings.min_confidence
        );
    }
    if settings.width == 0 || settings.height == 0 {
        return Err(format!(
            "Capture size must be positive, got {}x{}",
            settings.width, settings.height
        )
        .into());
    }
    let key_ok = !settings.storage_key.is_empty()
        && settings
            .storage_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !key_ok {
        return Err(format!(
            "Storage key may only contain letters, digits, '_' and '-', got '{}'",
            settings.storage_key
        )
        .into());
    }
    if let Some(dir) = &cli.frames_dir {
        if !dir.is_dir() {
            return Err(format!("Frames directory not found: {}", dir.display()).into());
        }
    }
    Ok(())
}

fn build_frame_source(cli: &Cli, settings: &Settings) -> Box<dyn FrameSource> {
    let config = FrameSourceConfig {
        width: settings.width,
        height: settings.height,
        mirrored: settings.mirrored,
    };
    match &cli.frames_dir {
        Some(dir) => Box::new(ImageSequenceFrameSource::new(dir.clone(), config)),
        None => {
            let source = FfmpegFrameSource::new(cli.camera.clone(), config);
            match &cli.input_format {
                Some(format) => Box::new(source.with_input_format(format.clone())),
                None => Box::new(source),
            }
        }
    }
}

fn spawn_detection(cli: &Cli, settings: &Settings) -> (DetectionWorker, Receiver<DetectionEvent>) {
    let locator = model_locator(cli.model_dir.clone(), settings.model_url.clone());
    let options = EngineOptions {
        model: settings.model.into(),
        min_confidence: settings.min_confidence,
    };
    DetectionWorker::spawn(
        move || Ok(Box::new(OnnxBlazefaceEngine::new(locator)) as Box<dyn DetectionEngine>),
        options,
    )
}

fn model_locator(bundled_dir: Option<PathBuf>, base_url: Option<String>) -> ModelLocator {
    Box::new(move |kind| {
        let name = model_file_name(kind);
        let url = base_url
            .as_deref()
            .map(|base| format!("{}/{name}", base.trim_end_matches('/')));
        log::info!("Resolving model: {name}");
        model_resolver::resolve(
            name,
            url.as_deref(),
            bundled_dir.as_deref(),
            Some(Box::new(download_progress)),
        )
        .map_err(|e| e.to_string())
    })
}

fn model_file_name(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::Fast => BLAZEFACE_SHORT_MODEL_NAME,
        ModelKind::Accurate => BLAZEFACE_FULL_MODEL_NAME,
    }
}

fn spawn_command_reader(tx: Sender<UserCommand>) {
    let spawned = thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() || cmd == UserCommand::Quit {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("Unknown command '{}'", line.trim()),
                }
            }
        });
    if let Err(e) = spawned {
        log::error!("Failed to spawn command reader: {e}");
    }
}

fn parse_command(line: &str) -> Option<UserCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "s" | "start" => Some(UserCommand::Start),
        "c" | "cancel" => Some(UserCommand::Cancel),
        "r" | "reset" => Some(UserCommand::Reset),
        "q" | "quit" | "exit" => Some(UserCommand::Quit),
        _ => None,
    }
}

fn render(snapshot: &SessionSnapshot) {
    eprintln!(
        "[{:10}] {}  (frame {})",
        snapshot.phase,
        snapshot.status_message,
        snapshot.feedback_level.border_color()
    );
    if snapshot.phase == Phase::Complete {
        if let Some(artifact) = &snapshot.captured_artifact {
            eprintln!(
                "  Captured {}x{} still saved as '{}'",
                artifact.image.width(),
                artifact.image.height(),
                artifact.storage_key
            );
        }
    }
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}
