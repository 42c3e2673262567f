// SPDX-License-Identifier: GPL-2.0
//
// Data model for present classification: the display configuration snapshot,
// the present profile used as the aggregation key, and the per-profile
// accumulator record.

use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Present occurred while the panel is presenting in a doze power mode.
pub const PRESENTING_WHEN_DOZE: u32 = 1 << 0;
/// Present only refreshed the refresh-rate indicator overlay.
pub const UPDATE_REFRESH_RATE_INDICATOR_ONLY: u32 = 1 << 1;

pub fn has_present_frame_flag(flags: u32, flag: u32) -> bool {
    flags & flag != 0
}

/// Display power mode as observed from power-state notifications.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum PowerMode {
    Off,
    Doze,
    DozeSuspend,
    #[default]
    On,
}

impl PowerMode {
    /// Off and doze-suspend disable presentation entirely; the present
    /// timeout must not be armed while in either.
    pub fn is_suspended(self) -> bool {
        matches!(self, PowerMode::Off | PowerMode::DozeSuspend)
    }
}

impl FromStr for PowerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(PowerMode::Off),
            "doze" => Ok(PowerMode::Doze),
            "doze-suspend" | "doze_suspend" => Ok(PowerMode::DozeSuspend),
            "on" => Ok(PowerMode::On),
            other => anyhow::bail!("unknown power mode '{}'", other),
        }
    }
}

impl std::fmt::Display for PowerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PowerMode::Off => "off",
            PowerMode::Doze => "doze",
            PowerMode::DozeSuspend => "doze-suspend",
            PowerMode::On => "on",
        })
    }
}

/// Panel brightness mode reported by the display context provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum BrightnessMode {
    #[default]
    Normal,
    High,
    Invalid,
}

impl FromStr for BrightnessMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(BrightnessMode::Normal),
            "high" => Ok(BrightnessMode::High),
            "invalid" => Ok(BrightnessMode::Invalid),
            other => anyhow::bail!("unknown brightness mode '{}'", other),
        }
    }
}

impl std::fmt::Display for BrightnessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BrightnessMode::Normal => "normal",
            BrightnessMode::High => "high",
            BrightnessMode::Invalid => "invalid",
        })
    }
}

/// The display state statistics are segmented by. Mutated only by the
/// tracker in response to power-state changes and brightness queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DisplayConfig {
    pub active_config_id: i32,
    pub power_mode: PowerMode,
    pub brightness_mode: BrightnessMode,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            active_config_id: -1,
            power_mode: PowerMode::default(),
            brightness_mode: BrightnessMode::default(),
        }
    }
}

/// Aggregation key: display configuration plus the number of TE ticks the
/// most recent frame occupied. Ordering over all fields keeps report
/// iteration deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PresentProfile {
    pub config: DisplayConfig,
    pub num_vsync: i32,
}

impl Default for PresentProfile {
    fn default() -> Self {
        Self {
            config: DisplayConfig::default(),
            num_vsync: 1,
        }
    }
}

/// Per-profile accumulator. Created lazily on first observation, never
/// deleted. `updated` is set on every mutation and cleared only by the
/// read-and-clear snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPresentRecord {
    pub count: u64,
    pub last_timestamp_ns: i64,
    pub updated: bool,
}

pub type DisplayPresentStatistics = FxHashMap<PresentProfile, DisplayPresentRecord>;
