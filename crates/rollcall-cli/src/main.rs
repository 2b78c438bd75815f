use anyhow::Result;
use clap::{Parser, Subcommand};
use rollcall_core::OnnxEngine;
use rollcall_hw::Camera;
use rollcall_store::{AttendanceLog, DescriptorStore, Roster};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod flows;

use config::Config;
use flows::FlowError;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person: capture one frame and enroll the first detected face
    Enroll {
        /// Name to register (name is identity; duplicates are indistinguishable)
        name: String,
    },
    /// Run the recognition loop and mark attendance until Ctrl-C
    Attend,
    /// Collect face crops for a person into the dataset directory
    Capture {
        name: String,
        /// Number of crops to save (defaults to ROLLCALL_CAPTURE_SAMPLES)
        #[arg(short, long)]
        count: Option<usize>,
    },
    /// Rebuild the descriptor store from the dataset directory
    Encode,
    /// Remove a person's descriptors and roster records
    Remove { name: String },
    /// List registered people
    Students,
    /// List attendance entries
    Log,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll { name } => {
            let mut store = DescriptorStore::open(config.descriptor_path())?;
            let mut roster = Roster::open(config.roster_path())?;
            let mut engine = OnnxEngine::load(
                &config.detector_model_path(),
                &config.recognizer_model_path(),
            )?;

            let mut camera = Camera::open(config.camera_index)?;
            camera.warmup(config.warmup_frames);

            match flows::enroll(
                &mut camera,
                &mut engine,
                &mut store,
                &mut roster,
                &config.dataset_dir(),
                &name,
            ) {
                Ok(()) => println!("Student {name} registered"),
                Err(FlowError::NoFaceDetected) => println!("No face detected. Try again."),
                Err(FlowError::DarkFeed) => {
                    println!("Camera feed is too dark. Check the lighting and try again.")
                }
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Attend => {
            let store = DescriptorStore::open(config.descriptor_path())?;
            if store.records().is_empty() {
                println!("No students registered yet. Enroll at least one first.");
                return Ok(());
            }

            let stop_rx = stop_on_ctrl_c();
            println!("Taking attendance. Press Ctrl-C to stop.");

            let cfg = config.clone();
            let summary = tokio::task::spawn_blocking(move || -> Result<_> {
                let mut log = AttendanceLog::open(cfg.attendance_path())?;
                let mut engine = OnnxEngine::load(
                    &cfg.detector_model_path(),
                    &cfg.recognizer_model_path(),
                )?;

                // The camera lives in this scope: dropped (and released) on
                // every exit path, stop signal or error alike.
                let mut camera = Camera::open(cfg.camera_index)?;
                camera.warmup(cfg.warmup_frames);

                let summary = flows::take_attendance(
                    &mut camera,
                    &mut engine,
                    &store,
                    &mut log,
                    cfg.match_threshold,
                    &stop_rx,
                )?;
                Ok(summary)
            })
            .await??;

            match summary.marked.len() {
                0 => println!("No new attendance marks."),
                n => println!("Attendance marked for {n} student(s): {}", summary.marked.join(", ")),
            }
        }

        Commands::Capture { name, count } => {
            let count = count.unwrap_or(config.capture_samples);
            let stop_rx = stop_on_ctrl_c();
            println!("Capturing up to {count} face crops for {name}. Press Ctrl-C to stop.");

            let cfg = config.clone();
            let saved = tokio::task::spawn_blocking(move || -> Result<usize> {
                let mut engine = OnnxEngine::load(
                    &cfg.detector_model_path(),
                    &cfg.recognizer_model_path(),
                )?;
                let mut camera = Camera::open(cfg.camera_index)?;
                camera.warmup(cfg.warmup_frames);

                let saved = flows::capture_samples(
                    &mut camera,
                    &mut engine,
                    &cfg.dataset_dir(),
                    &name,
                    count,
                    &stop_rx,
                )?;
                Ok(saved)
            })
            .await??;

            println!("Saved {saved} face crop(s)");
        }

        Commands::Encode => {
            let mut store = DescriptorStore::open(config.descriptor_path())?;
            let mut engine = OnnxEngine::load(
                &config.detector_model_path(),
                &config.recognizer_model_path(),
            )?;

            let encoded =
                flows::rebuild_descriptors(&mut engine, &config.dataset_dir(), &mut store)?;
            println!("Encoded {encoded} descriptor(s) from the dataset");
        }

        Commands::Remove { name } => {
            let mut store = DescriptorStore::open(config.descriptor_path())?;
            let mut roster = Roster::open(config.roster_path())?;

            match flows::remove_person(&mut store, &mut roster, &name) {
                Ok(()) => println!("Student {name} deleted"),
                Err(FlowError::PersonNotFound(name)) => println!("Student {name} not found"),
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Students => {
            let roster = Roster::open(config.roster_path())?;
            if roster.is_empty() {
                println!("No students registered yet");
            } else {
                for record in roster.records() {
                    println!("{} (registered {})", record.name, record.registered_on);
                }
            }
        }

        Commands::Log => {
            let log = AttendanceLog::open(config.attendance_path())?;
            if log.entries().is_empty() {
                println!("No attendance records yet");
            } else {
                for entry in log.entries() {
                    println!("{} - {} {}", entry.name, entry.date, entry.time);
                }
            }
        }
    }

    Ok(())
}

/// A watch channel that flips to true on the first Ctrl-C.
fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });
    stop_rx
}
