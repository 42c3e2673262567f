// SPDX-License-Identifier: GPL-2.0
//
// Delta reporting for the statistics table. The monitor thread polls the
// read-and-clear interface so each block shows only profiles that changed
// since the previous one.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use vrr_stats::{
    DisplayPresentRecord, DisplayPresentStatistics, PresentProfile, VariableRefreshRateStatistic,
};

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub profile: PresentProfile,
    pub record: DisplayPresentRecord,
}

/// Flattens a snapshot into deterministic (profile-ordered) rows.
pub fn sorted_entries(statistics: DisplayPresentStatistics) -> Vec<ReportEntry> {
    let mut entries: Vec<ReportEntry> = statistics
        .into_iter()
        .map(|(profile, record)| ReportEntry { profile, record })
        .collect();
    entries.sort_by_key(|entry| entry.profile);
    entries
}

pub fn format_block<W: Write>(w: &mut W, title: &str, entries: &[ReportEntry]) -> Result<()> {
    let now = Local::now();
    writeln!(w, "┌─ {} {} ─", title, now.format("%H:%M:%S"))?;
    for entry in entries {
        writeln!(
            w,
            "│ cfg {:>3}  power {:<12}  bm {:<7}  vsync {:>3}  count {:>10}  last {}ns",
            entry.profile.config.active_config_id,
            entry.profile.config.power_mode.to_string(),
            entry.profile.config.brightness_mode.to_string(),
            entry.profile.num_vsync,
            entry.record.count,
            entry.record.last_timestamp_ns,
        )?;
    }
    writeln!(w, "└─")?;
    Ok(())
}

pub fn print_entries(entries: &[ReportEntry], title: &str, json: bool) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string(entries)?);
    } else {
        format_block(&mut std::io::stdout(), title, entries)?;
    }
    Ok(())
}

/// Reporting loop: every `interval` pulls the delta snapshot and prints it.
pub fn monitor(
    stat: Arc<VariableRefreshRateStatistic>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    json: bool,
) -> Result<()> {
    while !shutdown.load(Ordering::Relaxed) {
        // Sleep in small increments to respond to shutdown.
        let slices = (interval.as_millis() / 100).max(1);
        for _ in 0..slices {
            if shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        let entries = sorted_entries(stat.get_updated_statistics());
        print_entries(&entries, "vrrstatd", json)?;
    }
    Ok(())
}

/// Full-table dump, used once at shutdown.
pub fn dump_full(stat: &VariableRefreshRateStatistic, json: bool) -> Result<()> {
    let entries = sorted_entries(stat.get_statistics());
    print_entries(&entries, "vrrstatd total", json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrr_stats::{BrightnessMode, DisplayConfig, PowerMode};

    fn sample_statistics() -> DisplayPresentStatistics {
        let mut statistics = DisplayPresentStatistics::default();
        for (vsync, count) in [(4, 7u64), (1, 120u64)] {
            statistics.insert(
                PresentProfile {
                    config: DisplayConfig {
                        active_config_id: 0,
                        power_mode: PowerMode::On,
                        brightness_mode: BrightnessMode::Normal,
                    },
                    num_vsync: vsync,
                },
                DisplayPresentRecord {
                    count,
                    last_timestamp_ns: 16_666_667,
                    updated: true,
                },
            );
        }
        statistics
    }

    #[test]
    fn entries_are_sorted_by_profile() {
        let entries = sorted_entries(sample_statistics());
        assert_eq!(entries.len(), 2);
        assert!(entries[0].profile.num_vsync < entries[1].profile.num_vsync);
    }

    #[test]
    fn format_block_includes_rows() {
        let entries = sorted_entries(sample_statistics());
        let mut out = Vec::new();
        format_block(&mut out, "vrrstatd", &entries).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("vsync   1"));
        assert!(s.contains("120"));
        assert!(s.contains("power on"));
        assert!(s.starts_with("┌─ vrrstatd"));
    }

    #[test]
    fn json_round_trips_as_array() {
        let entries = sorted_entries(sample_statistics());
        let json = serde_json::to_string(&entries).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["profile"]["num_vsync"], 1);
    }
}
