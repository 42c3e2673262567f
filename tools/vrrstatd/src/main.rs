// SPDX-License-Identifier: GPL-2.0
//
// vrrstatd: Display presentation statistics daemon
//
// Feeds present/power/config events from a line-oriented stream into the
// vrr_stats tracker, runs the scheduler loop that drains the deadline queue,
// and periodically reports per-profile delta statistics.

mod brightness;
mod feed;
mod report;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use vrr_stats::{
    BrightnessMode, DisplayContextProvider, EventQueue, ManualClock, MonotonicClock, SystemClock,
    VariableRefreshRateStatistic,
};

use crate::brightness::{BacklightWatcher, FixedBrightness};

const DAEMON_NAME: &str = "vrrstatd";

/// Longest the scheduler loop sleeps before re-checking shutdown.
const MAX_SCHED_SLEEP_NS: i64 = 100_000_000;
/// Shortest sleep, so a near deadline never degrades into a spin.
const MIN_SCHED_SLEEP_NS: i64 = 1_000_000;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "vrrstatd",
    version,
    disable_version_flag = true,
    about = "Aggregates display present events into per-profile refresh statistics."
)]
struct Opts {
    /// Maximum content frame rate of the panel in Hz.
    #[clap(long, default_value = "120")]
    max_frame_rate: i32,

    /// Maximum TE (tearing-effect) frequency of the panel in Hz.
    #[clap(long, default_value = "240")]
    max_te_frequency: i32,

    /// Active display configuration id to key statistics with.
    #[clap(long, default_value = "0")]
    config_id: i32,

    /// Initial TE frequency in Hz. Defaults to the maximum frame rate;
    /// `config` stream commands can change it at runtime.
    #[clap(long)]
    te_frequency: Option<i32>,

    /// Period of the periodic statistics debug dump in milliseconds.
    /// 0 disables the dump event.
    #[clap(long, default_value = "0")]
    update_period_ms: u64,

    /// Replay events from FILE instead of reading stdin. Deadlines follow
    /// the timestamps in the stream rather than wall time.
    #[clap(long)]
    replay: Option<PathBuf>,

    /// Delta report interval in seconds.
    #[clap(short = 'i', long, default_value = "2.0")]
    interval: f64,

    /// Emit reports as JSON arrays instead of formatted blocks.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Fixed brightness mode reported to the tracker (normal, high,
    /// invalid). Ignored when --backlight is given.
    #[clap(long, default_value = "normal")]
    brightness: BrightnessMode,

    /// Poll a sysfs backlight directory (containing `brightness` and
    /// `max_brightness`) for the brightness mode.
    #[clap(long)]
    backlight: Option<PathBuf>,

    /// Enable verbose output, including debug level messages.
    #[clap(short = 'v', long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    /// Print version and exit.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    version: bool,
}

/// The wait/sleep half of the timeout model: sleeps toward the earliest
/// pending deadline and runs whatever became due. The queue only stores
/// deadlines; this loop is the thing that actually waits.
fn scheduler_loop(
    queue: Arc<EventQueue>,
    clock: Arc<dyn MonotonicClock>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        for mut event in queue.pop_due(clock.now_ns()) {
            (event.action)();
        }
        let sleep_ns = match queue.next_deadline_ns() {
            Some(deadline_ns) => {
                (deadline_ns - clock.now_ns()).clamp(MIN_SCHED_SLEEP_NS, MAX_SCHED_SLEEP_NS)
            }
            None => MAX_SCHED_SLEEP_NS,
        };
        thread::sleep(Duration::from_nanos(sleep_ns as u64));
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("{} {}", DAEMON_NAME, env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let loglevel = if opts.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Warn
    };

    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_offset_to_local()
        .expect("Failed to set local time offset")
        .set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let context: Arc<dyn DisplayContextProvider> = match &opts.backlight {
        Some(dir) => Arc::new(BacklightWatcher::new(dir.clone())?),
        None => Arc::new(FixedBrightness::new(opts.brightness)),
    };

    // Replay streams carry their own time base; live mode uses wall time
    // for deadlines while present timestamps come from the stream either way.
    let (clock, replay_clock): (Arc<dyn MonotonicClock>, Option<Arc<ManualClock>>) =
        if opts.replay.is_some() {
            let manual = Arc::new(ManualClock::new(0));
            (manual.clone(), Some(manual))
        } else {
            (Arc::new(SystemClock), None)
        };

    let queue = Arc::new(EventQueue::new());
    let stat = VariableRefreshRateStatistic::new(
        context,
        clock.clone(),
        queue.clone(),
        opts.max_frame_rate,
        opts.max_te_frequency,
        (opts.update_period_ms as i64) * 1_000_000,
    )?;
    stat.set_active_vrr_configuration(
        opts.config_id,
        opts.te_frequency.unwrap_or(opts.max_frame_rate),
    );

    let sched_thread = {
        let queue = queue.clone();
        let clock = clock.clone();
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("vrr-sched".to_string())
            .spawn(move || scheduler_loop(queue, clock, shutdown))
            .context("failed to spawn scheduler loop")?
    };

    let report_thread = {
        let stat = stat.clone();
        let shutdown = shutdown.clone();
        let interval = Duration::from_secs_f64(opts.interval);
        let json = opts.json;
        thread::Builder::new()
            .name("vrr-report".to_string())
            .spawn(move || {
                if let Err(e) = report::monitor(stat, interval, shutdown, json) {
                    warn!("report thread finished because of an error {}", e);
                }
            })
            .context("failed to spawn report thread")?
    };

    // The feeder runs on the main thread until EOF or Ctrl-C.
    match &opts.replay {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open replay file {}", path.display()))?;
            feed::run_feed(
                BufReader::new(file),
                &stat,
                replay_clock.as_deref(),
                &shutdown,
            )?;
        }
        None => {
            let stdin = std::io::stdin();
            feed::run_feed(stdin.lock(), &stat, replay_clock.as_deref(), &shutdown)?;
        }
    }

    info!("event stream finished, shutting down");
    shutdown.store(true, Ordering::Relaxed);

    let _ = sched_thread.join();
    let mut joined = false;
    for _ in 0..10 {
        if report_thread.is_finished() {
            let _ = report_thread.join();
            joined = true;
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    if !joined {
        warn!("report thread didn't finish in time, detaching");
    }

    report::dump_full(&stat, opts.json)?;
    Ok(())
}
