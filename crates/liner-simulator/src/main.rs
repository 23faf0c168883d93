//! Desktop simulator for the Smart Liner tag firmware.
//!
//! Runs liner-core's scheduler, record store and FFT pipeline against a RAM
//! flash and a synthetic liner, so the task schedule can be exercised without
//! hardware. A background thread plays the 100 ms timer interrupt.
//!
//! # Command injection
//!
//! Frames passed with `--command` are handed to the command handler once the
//! tag has started, as if received over BLE:
//!
//! | Frame    | Action                         |
//! |----------|--------------------------------|
//! | `A4`     | Data session count             |
//! | `A9`     | On-demand FFT                  |
//! | `AF`     | On-demand recording            |
//! | `A30000` | Download data file 0           |
//! | `A7`     | Read the configuration         |
//!
//! `--speed` divides every tick and delay, so `--speed 60` runs an hour of
//! tag time in a minute.

mod board;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use liner_core::app_state::App;
use liner_core::scheduler::{TICKS_PER_SECOND, TaskScheduler, secs_to_ticks};
use liner_core::storage::{FS_BLOCK_COUNT, MemFlash, RamFileSystem, RecordStore, SCRATCH_SIZE};

use board::SimBoard;

// ---------------------------------------------------------------------------
// Timing constants
// ---------------------------------------------------------------------------

/// Real duration of one scheduler tick at speed 1.
const TICK_PERIOD: Duration = Duration::from_millis(1000 / TICKS_PER_SECOND as u64);

/// Main loop idle between dispatch rounds.
const IDLE_PERIOD: Duration = Duration::from_millis(5);

static SCHEDULER: TaskScheduler = TaskScheduler::new();

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "liner-simulator")]
#[command(about = "Run the Smart Liner task schedule on a simulated tag", long_about = None)]
struct Args {
    /// Tag seconds to simulate, 0 runs until power off
    #[arg(long, default_value = "600")]
    seconds: u32,

    /// Time compression factor applied to ticks and delays
    #[arg(long, default_value = "1")]
    speed: u32,

    /// Frequency of the synthetic vibration tone in Hz
    #[arg(long, default_value = "120.0")]
    vibration_hz: f64,

    /// Recording duration in seconds (5..=300)
    #[arg(long)]
    record_seconds: Option<u16>,

    /// Periodic FFT interval in hours, 0 disables it
    #[arg(long)]
    fft_hours: Option<u8>,

    /// Pretend a BLE central is connected
    #[arg(long)]
    connected: bool,

    /// Hex command frame to inject after start, may be repeated
    #[arg(long = "command", value_name = "HEX")]
    commands: Vec<String>,
}

/// Decode an ASCII hex frame such as `A30100`
fn decode_frame(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Drive the scheduler ticks from a background thread until `stop` is set.
fn spawn_ticker(speed: u32, ticks: Arc<AtomicU32>, stop: Arc<AtomicBool>) {
    let period = TICK_PERIOD / speed.max(1);
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            std::thread::sleep(period);
            SCHEDULER.tick_handler();
            ticks.fetch_add(1, Ordering::Relaxed);
        }
    });
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    let args = Args::parse();
    info!("Starting Smart Liner simulator");
    info!(
        "Simulating {} s at {}x, vibration tone {} Hz",
        args.seconds, args.speed, args.vibration_hz
    );

    let store = RecordStore::new(
        RamFileSystem::new(FS_BLOCK_COUNT),
        MemFlash::new(SCRATCH_SIZE as usize),
    );
    let board = SimBoard::new(args.vibration_hz, args.speed, args.connected);
    let mut app = App::new(&SCHEDULER, store, board);

    if let Some(seconds) = args.record_seconds {
        app.config.record_duration_seconds = seconds;
    }
    if let Some(hours) = args.fft_hours {
        app.config.fft_period_hours = hours;
    }
    app.config = app.config.sanitized();

    app.start().expect("Task table too small for the background tasks");

    for text in &args.commands {
        match decode_frame(text) {
            Some(frame) => {
                info!("Injecting command {}", text);
                if let Err(e) = app.handle_command(&frame) {
                    warn!("Command {} rejected: {}", text, e);
                }
            }
            None => error!("Invalid hex frame: {}", text),
        }
    }

    let ticks = Arc::new(AtomicU32::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    spawn_ticker(args.speed, ticks.clone(), stop.clone());

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    let limit = secs_to_ticks(args.seconds);
    let mut dispatched = 0usize;
    loop {
        dispatched += app.dispatch();

        if app.hw.powered_off {
            info!("Tag powered off");
            break;
        }
        if app.hw.reset_requested {
            info!("Tag reset, simulation ends");
            break;
        }
        if limit != 0 && ticks.load(Ordering::Relaxed) >= limit {
            break;
        }

        std::thread::sleep(IDLE_PERIOD);
    }
    stop.store(true, Ordering::Relaxed);

    info!(
        "Simulator exiting after {} ticks: {} tasks run, {} data / {} FFT sessions, flash {}% used",
        ticks.load(Ordering::Relaxed),
        dispatched,
        app.store.get_data_session_count(),
        app.store.get_fft_session_count(),
        app.store.usage_percent().unwrap_or(0)
    );
}
