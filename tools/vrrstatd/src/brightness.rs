// SPDX-License-Identifier: GPL-2.0
//
// Brightness mode providers: a fixed mode from the command line, or a sysfs
// backlight watcher keeping a snapshot fresh in the background.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use vrr_stats::{BrightnessMode, DisplayContextProvider};

/// Fraction of max_brightness at and above which the panel is considered to
/// run in high-brightness mode.
const HIGH_BRIGHTNESS_NUM: u64 = 9;
const HIGH_BRIGHTNESS_DEN: u64 = 10;

pub struct FixedBrightness {
    mode: BrightnessMode,
}

impl FixedBrightness {
    pub fn new(mode: BrightnessMode) -> Self {
        Self { mode }
    }
}

impl DisplayContextProvider for FixedBrightness {
    fn brightness_mode(&self) -> BrightnessMode {
        self.mode
    }
}

/// Polls `<dir>/brightness` against `<dir>/max_brightness` at 1 Hz on a
/// background thread. Readers take the latest snapshot without blocking on
/// the filesystem.
pub struct BacklightWatcher {
    mode: Arc<RwLock<BrightnessMode>>,
    shutdown: Arc<AtomicBool>,
    _thread: Option<JoinHandle<()>>,
}

impl BacklightWatcher {
    pub fn new(dir: PathBuf) -> Result<Self> {
        let initial = read_mode(&dir);
        if initial == BrightnessMode::Invalid {
            warn!(
                "backlight path {} is not readable yet; reporting invalid until it is",
                dir.display()
            );
        }
        let mode = Arc::new(RwLock::new(initial));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_mode = Arc::clone(&mode);
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("backlight-watch".to_string())
            .spawn(move || watcher_loop(dir, thread_mode, thread_shutdown))
            .context("failed to spawn backlight watcher")?;

        Ok(Self {
            mode,
            shutdown,
            _thread: Some(handle),
        })
    }
}

impl DisplayContextProvider for BacklightWatcher {
    fn brightness_mode(&self) -> BrightnessMode {
        self.mode
            .read()
            .map(|guard| *guard)
            .unwrap_or(BrightnessMode::Invalid)
    }
}

impl Drop for BacklightWatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self._thread.take() {
            for _ in 0..5 {
                if handle.is_finished() {
                    let _ = handle.join();
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
            warn!("backlight watcher thread didn't shutdown cleanly");
        }
    }
}

fn watcher_loop(dir: PathBuf, shared: Arc<RwLock<BrightnessMode>>, shutdown: Arc<AtomicBool>) {
    info!("watching backlight at {}", dir.display());
    while !shutdown.load(Ordering::Relaxed) {
        let mode = read_mode(&dir);
        if let Ok(mut guard) = shared.write() {
            *guard = mode;
        }
        // Brightness mode changes are slow; poll at 1Hz but stay responsive
        // to shutdown.
        for _ in 0..10 {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}

/// Maps the sysfs backlight pair to a brightness mode. Unreadable or
/// malformed files report `Invalid`; the tracker substitutes its default.
fn read_mode(dir: &Path) -> BrightnessMode {
    let brightness = read_u64(&dir.join("brightness"));
    let max_brightness = read_u64(&dir.join("max_brightness"));
    match (brightness, max_brightness) {
        (Some(value), Some(max)) if max > 0 => {
            if value * HIGH_BRIGHTNESS_DEN >= max * HIGH_BRIGHTNESS_NUM {
                BrightnessMode::High
            } else {
                BrightnessMode::Normal
            }
        }
        _ => BrightnessMode::Invalid,
    }
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_backlight(dir: &Path, brightness: &str, max: &str) {
        fs::write(dir.join("brightness"), brightness).unwrap();
        fs::write(dir.join("max_brightness"), max).unwrap();
    }

    #[test]
    fn maps_levels_to_modes() {
        let dir = tempfile::tempdir().unwrap();

        write_backlight(dir.path(), "100\n", "1000\n");
        assert_eq!(read_mode(dir.path()), BrightnessMode::Normal);

        write_backlight(dir.path(), "900\n", "1000\n");
        assert_eq!(read_mode(dir.path()), BrightnessMode::High);

        write_backlight(dir.path(), "899\n", "1000\n");
        assert_eq!(read_mode(dir.path()), BrightnessMode::Normal);
    }

    #[test]
    fn unreadable_or_malformed_reports_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_mode(dir.path()), BrightnessMode::Invalid);

        write_backlight(dir.path(), "not-a-number\n", "1000\n");
        assert_eq!(read_mode(dir.path()), BrightnessMode::Invalid);

        write_backlight(dir.path(), "10\n", "0\n");
        assert_eq!(read_mode(dir.path()), BrightnessMode::Invalid);
    }

    #[test]
    fn fixed_provider_reports_configured_mode() {
        let provider = FixedBrightness::new(BrightnessMode::High);
        assert_eq!(provider.brightness_mode(), BrightnessMode::High);
    }
}
