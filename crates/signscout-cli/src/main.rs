use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use signscout_vision::export;
use signscout_vision::overlay::{Overlay, OverlayStyle};
use signscout_vision::{
    Frame, FrameScheduler, FusionEngine, FusionReport, InferenceEngine, LabelTable, Orientation, VisionConfig,
};

#[cfg(feature = "vision-tflite")]
use signscout_vision::tflite::TfliteEngine;

#[derive(Debug, Parser)]
#[command(name = "signscout", version, about = "SignScout - traffic sign detection & recognition")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check config, label file and model paths.
    Doctor,
    /// Run one detection + recognition pass over a still image.
    Detect {
        image: PathBuf,
        /// Image comes from a sideways-mounted sensor.
        #[arg(long)]
        portrait: bool,
        #[arg(long)]
        json: bool,
        /// Write the image with boxes drawn on it.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write the result lines to a text file.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Live preview over a directory of frames.
    Run,
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    vision: VisionConfig,
    preview: Option<PreviewCfg>,
}

#[derive(Debug, serde::Deserialize)]
struct PreviewCfg {
    frame_dir: String,
    #[serde(default = "default_fps")]
    fps: f32,
    #[serde(default)]
    portrait: bool,
    /// Annotated frames are written here when set.
    overlay_dir: Option<String>,
}

fn default_fps() -> f32 { 15.0 }

impl PreviewCfg {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.fps > 0.0 && self.fps <= 120.0, "preview.fps out of range (0, 120]");
        anyhow::ensure!(Path::new(&self.frame_dir).is_dir(), "preview.frame_dir is not a directory: {}", self.frame_dir);
        Ok(())
    }

    fn orientation(&self) -> Orientation {
        if self.portrait { Orientation::Portrait } else { Orientation::Landscape }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    let cfg: Config = toml::from_str(&s).context("parse config toml")?;
    cfg.vision.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Detect { image, portrait, json, out, export } => {
            let orientation = if portrait { Orientation::Portrait } else { Orientation::Landscape };
            detect(&cfg, &image, orientation, json, out, export).await?
        }
        Command::Run => run(&cfg).await?,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    let v = &cfg.vision;

    let labels = LabelTable::load(&v.labels_path).context("labels")?;
    info!("doctor: {} classes", labels.len());

    for (stage, path) in [("detection", &v.detection_model), ("recognition", &v.recognition_model)] {
        anyhow::ensure!(Path::new(path).is_file(), "{} model not found: {}", stage, path);
    }

    if let Some(p) = &cfg.preview {
        p.validate()?;
    }

    #[cfg(not(feature = "vision-tflite"))]
    warn!("doctor: binary built without --features vision-tflite; inference is unavailable");

    info!("doctor: OK");
    Ok(())
}

async fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => inspect_models(&cfg.vision),
    }
}

#[cfg(feature = "vision-tflite")]
fn inspect_models(v: &VisionConfig) -> Result<()> {
    print!("{}", TfliteEngine::new(&v.detection_model, v.detection_threads)?.inspect()?);
    print!("{}", TfliteEngine::new(&v.recognition_model, v.recognition_threads)?.inspect()?);
    Ok(())
}

#[cfg(not(feature = "vision-tflite"))]
fn inspect_models(_v: &VisionConfig) -> Result<()> {
    anyhow::bail!("vision backend not available; build with --features vision-tflite")
}

#[derive(serde::Serialize)]
struct DetectOutput<'a> {
    image: String,
    generated_at: String,
    report: &'a FusionReport,
    lines: Vec<String>,
}

async fn detect(
    cfg: &Config,
    image_path: &Path,
    orientation: Orientation,
    json: bool,
    out: Option<PathBuf>,
    export_path: Option<PathBuf>,
) -> Result<()> {
    let fusion = Arc::new(build_fusion(&cfg.vision)?);
    let img = image::open(image_path).with_context(|| format!("open image {}", image_path.display()))?;
    let frame = Frame::from_image(img);

    let engine = fusion.clone();
    let pass = tokio::task::spawn_blocking(move || engine.fuse(frame, orientation)).await??;
    let lines = export::result_lines(&pass.report, fusion.labels());

    if json {
        let doc = DetectOutput {
            image: image_path.display().to_string(),
            generated_at: now_rfc3339()?,
            report: &pass.report,
            lines: lines.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        for l in &lines {
            println!("{}", l);
        }
    }

    if let Some(path) = export_path {
        let mut text = format!("# {} {}\n", image_path.display(), now_rfc3339()?);
        for l in &lines {
            text.push_str(l);
            text.push('\n');
        }
        tokio::fs::write(&path, text).await.with_context(|| format!("write {}", path.display()))?;
        info!("detect: results written to {}", path.display());
    }

    if let Some(path) = out {
        let drawn = Overlay::new(OverlayStyle::default())?.draw(pass.frame, &pass.report, fusion.labels());
        save_frame(drawn, &path)?;
        info!("detect: annotated image written to {}", path.display());
    }
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    let preview = cfg.preview.as_ref().context("no [preview] config section")?;
    preview.validate()?;

    // Preview keeps going without inference if the models cannot be loaded.
    let scheduler = match build_fusion(&cfg.vision) {
        Ok(f) => {
            let labels = f.labels().clone();
            Some((FrameScheduler::new(Arc::new(f), tokio::runtime::Handle::current()), labels))
        }
        Err(e) => {
            warn!("run: fusion unavailable, preview only: {:#}", e);
            None
        }
    };

    let frames = list_frames(Path::new(&preview.frame_dir))?;
    anyhow::ensure!(!frames.is_empty(), "no frames in {}", preview.frame_dir);
    if let Some(dir) = &preview.overlay_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("create overlay dir {}", dir))?;
    }

    let orientation = preview.orientation();
    let period = Duration::from_secs_f32(1.0 / preview.fps);
    let overlay = Overlay::new(OverlayStyle::default())?;
    let mut meter = FpsMeter::new(FPS_WINDOW);
    info!("run: {} frames at {} fps, {:?}", frames.len(), preview.fps, orientation);

    for (n, path) in frames.iter().enumerate() {
        let frame = match image::open(path) {
            Ok(img) => Frame::from_image(img),
            Err(e) => {
                warn!("run: skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let fps = meter.tick(Instant::now());
        let report = scheduler.as_ref().and_then(|(s, labels)| Some((s.poll(&frame, orientation)?, labels)));
        if let Some((r, _)) = &report {
            info!("run: frame {} {}", n, export::live_summary(r, fps).join(", "));
        }

        if let Some(dir) = &preview.overlay_dir {
            let drawn = match &report {
                Some((r, labels)) => overlay.draw(frame, r, labels),
                None => frame,
            };
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
            save_frame(drawn, &Path::new(dir).join(format!("{}.png", name)))?;
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("run: interrupted");
                break;
            }
        }
    }

    if let Some((s, _)) = &scheduler {
        while s.is_busy() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let st = s.stats();
        info!("run: done, passes started={} completed={} failed={}", st.started, st.completed, st.failed);
    }
    Ok(())
}

const FPS_WINDOW: usize = 10;

/// Frame rate over the last few frame intervals.
struct FpsMeter {
    window: usize,
    stamps: VecDeque<Instant>,
}

impl FpsMeter {
    fn new(window: usize) -> Self {
        Self { window: window.max(1), stamps: VecDeque::with_capacity(window + 1) }
    }

    /// Record a frame shown at `now`; 0 until two frames have been seen.
    fn tick(&mut self, now: Instant) -> f32 {
        self.stamps.push_back(now);
        if self.stamps.len() > self.window + 1 {
            self.stamps.pop_front();
        }
        let (Some(first), Some(last)) = (self.stamps.front(), self.stamps.back()) else { return 0.0 };
        let span = last.duration_since(*first).as_secs_f32();
        if span <= 0.0 {
            return 0.0;
        }
        (self.stamps.len() - 1) as f32 / span
    }
}

fn build_fusion(v: &VisionConfig) -> Result<FusionEngine> {
    let labels = Arc::new(LabelTable::load(&v.labels_path).context("labels")?);
    let (detector, recognizer) = load_engines(v)?;
    info!("vision: {} + {} ready", detector.name(), recognizer.name());
    Ok(FusionEngine::new(v, detector, recognizer, labels))
}

#[cfg(feature = "vision-tflite")]
fn load_engines(v: &VisionConfig) -> Result<(Box<dyn InferenceEngine>, Box<dyn InferenceEngine>)> {
    let det = TfliteEngine::new(&v.detection_model, v.detection_threads).context("detection model")?;
    let rec = TfliteEngine::new(&v.recognition_model, v.recognition_threads).context("recognition model")?;
    Ok((Box::new(det), Box::new(rec)))
}

#[cfg(not(feature = "vision-tflite"))]
fn load_engines(_v: &VisionConfig) -> Result<(Box<dyn InferenceEngine>, Box<dyn InferenceEngine>)> {
    anyhow::bail!("vision backend not available; build with --features vision-tflite")
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        if matches!(ext.as_deref(), Some("jpg" | "jpeg" | "png")) {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

fn save_frame(frame: Frame, path: &Path) -> Result<()> {
    // jpeg has no alpha channel
    DynamicImage::ImageRgba8(frame.into_rgba())
        .to_rgb8()
        .save(path)
        .with_context(|| format!("write {}", path.display()))
}

fn now_rfc3339() -> Result<String> {
    Ok(time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339)?)
}
