use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use gymmy_camera::SyntheticCamera;
use gymmy_display::BroadcastDisplay;
use gymmy_engine::ScriptedDetector;
use gymmy_ops::{init_tracing, TelemetryStore};
use gymmy_pipeline::{PoseSession, SessionRunner};
use gymmy_types::config::GymmyConfig;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

/// Run a pose overlay session against the synthetic camera.
#[derive(Debug, Parser)]
#[command(name = "gymmy", version)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "GYMMY_CONFIG", default_value = "configs/dev.toml")]
    config: PathBuf,

    /// Override the number of frames the camera delivers; 0 streams until `--seconds` ends.
    #[arg(long)]
    frames: Option<u64>,

    /// Stop the session after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,

    /// Print the session summaries as JSON when the session ends.
    #[arg(long)]
    summary_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args.config);
    if let Some(frames) = args.frames {
        config.camera.max_frames = (frames > 0).then_some(frames);
    }
    init_tracing(&config.ops)?;
    info!(
        config = %args.config.display(),
        width = config.camera.width,
        height = config.camera.height,
        rotation = config.rotation().degrees(),
        "Loaded configuration"
    );

    let camera = SyntheticCamera::new(config.camera.clone())?;
    let detector = Arc::new(ScriptedDetector::new(config.detector.clone()));
    let display = Arc::new(BroadcastDisplay::new(8));
    let telemetry = TelemetryStore::new();

    let mut overlays = display.subscribe();
    let viewer = tokio::spawn(async move {
        let mut shown = 0u64;
        while let Some(overlay) = overlays.next().await {
            shown += 1;
            debug!(shown, width = overlay.width(), height = overlay.height(), "overlay on screen");
        }
        shown
    });

    let mut session = PoseSession::new(
        &config,
        camera,
        detector,
        display.clone(),
        telemetry.clone(),
    )?;
    session.start().await?;
    match args.seconds {
        Some(seconds) => {
            session
                .run_until(sleep(Duration::from_secs(seconds)))
                .await?
        }
        None => session.run().await?,
    }
    let summary = session.shutdown().await?;

    drop(display);
    let shown = viewer.await.context("overlay viewer task failed")?;
    info!(shown, "Viewer closed");

    if args.summary_json {
        println!("{}", telemetry.sessions_json().await?);
    } else {
        println!(
            "frames: {} received, {} admitted, {} dropped, {} rendered, {} released",
            summary.counters.received,
            summary.counters.admitted,
            summary.counters.dropped_busy,
            summary.counters.rendered,
            summary.frames_released,
        );
        if let Some(mean) = summary.mean_inference_ms {
            println!("mean inference: {mean:.1} ms");
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> GymmyConfig {
    match GymmyConfig::from_file(path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
                GymmyConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            GymmyConfig::default()
        }
    }
}
