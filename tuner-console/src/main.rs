//! # HPS Tuner Console
//!
//! Live tuner on the default input device, printing one cent-meter line per
//! reading.
//!
//! ## Architecture
//! - **Capture thread** (CPAL): fills pooled buffers, never waits on analysis
//! - **Analysis thread**: HPS pitch detection on each filled buffer
//! - **Main thread**: prints readings until `q` or end of input
//!
//! Settings are read from `tuner.json` in the working directory when present.
//! FFT wisdom is cached next to it.

mod meter;

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, unbounded};
use log::{error, info, warn};
use tuner_core::audio::{CaptureSource, CpalCapture};
use tuner_core::{DirectoryPlanStore, PooledBuffer, Tuner, TunerConfig};

const CONFIG_FILE: &str = "tuner.json";
const TARGET_SAMPLE_RATE: u32 = 48000;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("[MAIN] Starting HPS tuner console...");

    let config = load_config()?;
    let mut capture =
        CpalCapture::open_default(TARGET_SAMPLE_RATE).context("opening the input device")?;

    let (result_tx, result_rx) = unbounded();
    let tuner = Arc::new(
        Tuner::<f32>::new(
            config,
            Arc::new(DirectoryPlanStore::new(".")),
            f64::from(capture.sample_rate()),
            move |result| {
                let _ = result_tx.send(result);
            },
        )
        .context("initializing the analyzer")?,
    );

    let sink = Arc::clone(&tuner);
    capture.on_buffer_filled(
        tuner.pool().clone(),
        Box::new(move |buffer: PooledBuffer<f32>| {
            if let Err(e) = sink.buffer_filled(buffer) {
                error!("[MAIN] Analysis failed: {}", e);
            }
        }),
    );
    capture.start().context("starting capture")?;
    println!("Listening... press q and Enter to quit.");

    let (quit_tx, quit_rx) = bounded(1);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = quit_tx.send(());
    });

    loop {
        select! {
            recv(result_rx) -> msg => match msg {
                Ok(result) => println!("{}", meter::render(&result)),
                Err(_) => {
                    warn!("[MAIN] Result channel closed");
                    break;
                }
            },
            recv(quit_rx) -> _ => {
                info!("[MAIN] Quit requested");
                break;
            },
        }
    }

    capture.stop().context("stopping capture")?;
    // Releases the capture callback and with it the last other handle to the tuner.
    drop(capture);
    match Arc::try_unwrap(tuner) {
        Ok(tuner) => {
            tuner.shutdown();
        }
        Err(_) => warn!("[MAIN] Tuner still shared at exit"),
    }
    info!("[MAIN] Application finished");
    Ok(())
}

fn load_config() -> Result<TunerConfig> {
    let path = Path::new(CONFIG_FILE);
    if !path.exists() {
        info!("[MAIN] No {} found, using defaults", CONFIG_FILE);
        return Ok(TunerConfig::default());
    }
    let config = TunerConfig::load(path).with_context(|| format!("reading {CONFIG_FILE}"))?;
    info!("[MAIN] Loaded settings from {}", CONFIG_FILE);
    Ok(config)
}
