//! warpcal - calibrate the two camera warps and inspect the result
//!
//! `calibrate` fits both homographies and writes the artifact, `warp`
//! rectifies a still image through the CPU warp, and `uniforms` prints the
//! uniform structures the runtime's shader element expects.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use warpcal::calibration::{self, Estimator, TargetSize};
use warpcal::capture::{parse_points, Camera, CheckerboardCapture, ManualCapture, PatternKind, PointCapture};
use warpcal::config::Config;
use warpcal::shader::{Rgba, ShaderUniformState};
use warpcal::{CalibrationArtifact, CalibrationError, StereoWarp};

/// warpcal - perspective calibration for a two-camera video pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "warpcal.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit both camera homographies and write the calibration artifact
    Calibrate(CalibrateArgs),
    /// Rectify a still image through one camera's warp
    Warp(WarpArgs),
    /// Print shader uniform structures from an artifact
    Uniforms(UniformsArgs),
    /// Write a default configuration file if none exists
    Init,
}

#[derive(clap::Args, Debug)]
struct CalibrateArgs {
    /// Left camera still
    #[arg(long)]
    left: PathBuf,

    /// Right camera still
    #[arg(long)]
    right: PathBuf,

    /// How correspondences are obtained
    #[arg(long, value_enum)]
    pattern: Option<PatternKind>,

    /// Target width in metres
    #[arg(long)]
    target_width: Option<f64>,

    /// Target height in metres
    #[arg(long)]
    target_height: Option<f64>,

    /// Checkerboard inner corners per column
    #[arg(long)]
    rows: Option<usize>,

    /// Checkerboard inner corners per row
    #[arg(long)]
    cols: Option<usize>,

    /// Left corners as "x,y x,y x,y x,y" (TL, TR, BR, BL)
    #[arg(long)]
    left_points: Option<String>,

    /// Right corners as "x,y x,y x,y x,y" (TL, TR, BR, BL)
    #[arg(long)]
    right_points: Option<String>,

    /// JSON file with {"left": [{"x":..,"y":..}, ..], "right": [..]}
    #[arg(long)]
    points_file: Option<PathBuf>,

    /// Artifact path (defaults to <config_root>/<artifact>)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct WarpArgs {
    /// Calibration artifact (defaults to <config_root>/<artifact>)
    #[arg(long)]
    artifact: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Camera::Left)]
    camera: Camera,

    /// Source image
    #[arg(short, long)]
    input: PathBuf,

    /// Rectified image
    #[arg(short, long)]
    output: PathBuf,

    /// Output width (defaults to input width)
    #[arg(long)]
    width: Option<u32>,

    /// Output height (defaults to input height)
    #[arg(long)]
    height: Option<u32>,

    /// Emit the outside colour instead of clamping to the edge
    #[arg(long)]
    no_clamp: bool,

    /// Outside colour as "r,g,b,a" in [0, 1]
    #[arg(long)]
    outside_color: Option<Rgba>,
}

#[derive(clap::Args, Debug)]
struct UniformsArgs {
    /// Calibration artifact (defaults to <config_root>/<artifact>)
    #[arg(long)]
    artifact: Option<PathBuf>,

    /// Only this camera
    #[arg(long, value_enum)]
    camera: Option<Camera>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging; RUST_LOG directives refine the --verbose level
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let _subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("warpcal v{}", env!("CARGO_PKG_VERSION"));

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_message(&err));
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(args: Args) -> Result<()> {
    if let Command::Init = args.command {
        Config::load_or_create(&args.config)?;
        return Ok(());
    }
    let config = Config::load(&args.config)?;

    match args.command {
        Command::Calibrate(cmd) => calibrate(&config, cmd),
        Command::Warp(cmd) => warp(&config, cmd),
        Command::Uniforms(cmd) => uniforms(&config, cmd),
        Command::Init => Ok(()),
    }
}

fn calibrate(config: &Config, args: CalibrateArgs) -> Result<()> {
    let est = &config.estimator;
    let pattern = args.pattern.unwrap_or(est.pattern);
    let target = TargetSize {
        width_m: args.target_width.unwrap_or(est.target_width_m),
        height_m: args.target_height.unwrap_or(est.target_height_m),
    };
    if !(target.width_m.is_finite() && target.width_m > 0.0 && target.height_m.is_finite() && target.height_m > 0.0) {
        bail!(
            "target size must be positive, got {}x{}m",
            target.width_m,
            target.height_m
        );
    }
    let output = args.output.clone().unwrap_or_else(|| config.paths.artifact_path());

    info!("Pattern: {:?}", pattern);
    info!("Target: {}m x {}m", target.width_m, target.height_m);
    info!("Artifact: {:?}", output);

    let capture: Box<dyn PointCapture> = match pattern {
        PatternKind::Manual => Box::new(manual_capture(&args)?),
        PatternKind::Checkerboard => {
            let rows = args.rows.unwrap_or(est.rows);
            let cols = args.cols.unwrap_or(est.cols);
            info!("Checkerboard: {}x{} inner corners", rows, cols);
            Box::new(CheckerboardCapture::new(rows, cols))
        }
    };

    let result = Estimator::new(capture.as_ref(), target).run_and_write(&args.left, &args.right, &output)?;

    for cal in [&result.left, &result.right] {
        info!(
            "{}: {} points, rms {:.3}px",
            cal.camera,
            cal.correspondences.len(),
            cal.rms_error_px
        );
    }
    info!("Pixel to metre scale: {:.6}", result.pixel_to_meter_scale);
    Ok(())
}

fn manual_capture(args: &CalibrateArgs) -> Result<ManualCapture> {
    let mut capture = match &args.points_file {
        Some(path) => ManualCapture::from_file(path)?,
        None => ManualCapture::default(),
    };
    if let Some(points) = &args.left_points {
        capture.left = parse_points(points)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid --left-points")?;
    }
    if let Some(points) = &args.right_points {
        capture.right = parse_points(points)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid --right-points")?;
    }
    Ok(capture)
}

fn warp(config: &Config, args: WarpArgs) -> Result<()> {
    let artifact_path = args.artifact.unwrap_or_else(|| config.paths.artifact_path());
    let artifact = CalibrationArtifact::load(&artifact_path)?;

    let mut policy = config.warp;
    if args.no_clamp {
        policy.clamp_uv = false;
    }
    if let Some(color) = args.outside_color {
        if policy.clamp_uv {
            warn!("Outside colour has no effect while clamping");
        }
        policy.outside_color = color;
    }

    let input = calibration::load_image(&args.input)?;
    let width = args.width.unwrap_or(input.width());
    let height = args.height.unwrap_or(input.height());

    let stereo = StereoWarp::from_artifact(&artifact, policy);
    let stage = stereo.stage(args.camera);
    let out = stage.render_dynamic(&input, width, height);
    out.save(&args.output)
        .with_context(|| format!("Failed to write rectified image to {:?}", args.output))?;

    info!("Wrote {}x{} rectified {} image to {:?}", width, height, stage.camera(), args.output);
    Ok(())
}

fn uniforms(config: &Config, args: UniformsArgs) -> Result<()> {
    let artifact_path = args.artifact.unwrap_or_else(|| config.paths.artifact_path());
    let artifact = CalibrationArtifact::load(&artifact_path)?;

    let cameras = match args.camera {
        Some(camera) => vec![camera],
        None => Camera::BOTH.to_vec(),
    };
    for camera in cameras {
        let state = ShaderUniformState::from_homography(artifact.homography(camera), config.warp);
        println!("{}: {}", camera, state.to_uniform_structure());
    }
    Ok(())
}

fn calibration_error(err: &anyhow::Error) -> Option<&CalibrationError> {
    err.chain().find_map(|e| e.downcast_ref::<CalibrationError>())
}

fn error_message(err: &anyhow::Error) -> String {
    match calibration_error(err) {
        Some(cal) => format!("error: {}: {:#}", cal.kind(), err),
        None => format!("error: {:#}", err),
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    calibration_error(err)
        .map(|e| e.exit_code() as u8)
        .unwrap_or(1)
}
