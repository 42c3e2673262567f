// SPDX-License-Identifier: GPL-2.0
//
// Presentation statistics tracker: translates raw present/power notifications
// into a queryable histogram keyed by present profile, and keeps a present
// timeout armed so "the display stopped presenting" is detected purely from
// the absence of events.

use std::sync::{Arc, Mutex, Weak};

use anyhow::{bail, Result};
use log::{debug, error, warn};

use crate::clock::{MonotonicClock, NSEC_PER_SEC};
use crate::event_queue::{EventQueue, TimedEvent, TimedEventType};
use crate::profile::{
    has_present_frame_flag, BrightnessMode, DisplayPresentStatistics, PowerMode, PresentProfile,
    PRESENTING_WHEN_DOZE,
};

/// Present-timeout window: with no present for this long the display is
/// presumed to free-run at the maximum frame rate.
pub const MAX_PRESENT_INTERVAL_NS: i64 = NSEC_PER_SEC;

/// Fixed cadence the panel presents at while dozing.
pub const LOW_POWER_FRAME_RATE: i32 = 30;

/// Integer division rounding half away from zero. Vsync-count classification
/// depends on this matching hardware tick granularity exactly.
pub fn round_divide(dividend: i64, divisor: i64) -> i64 {
    let half = divisor / 2;
    if (dividend < 0) != (divisor < 0) {
        (dividend - half) / divisor
    } else {
        (dividend + half) / divisor
    }
}

/// Source of the current display brightness mode, queried on every present
/// and on every timeout fire.
pub trait DisplayContextProvider: Send + Sync {
    fn brightness_mode(&self) -> BrightnessMode;
}

/// Scalar tracker state. Touched only from the serialized calling context,
/// but kept behind its own lock so the tracker can be shared as an `Arc`.
#[derive(Debug)]
struct TrackerState {
    profile: PresentProfile,
    te_frequency: i32,
    te_interval_ns: i64,
    last_present_time_ns: i64,
}

pub struct VariableRefreshRateStatistic {
    context: Arc<dyn DisplayContextProvider>,
    clock: Arc<dyn MonotonicClock>,
    event_queue: Arc<EventQueue>,
    max_frame_rate: i32,
    max_te_frequency: i32,
    min_frame_interval_ns: i64,
    update_period_ns: i64,
    weak_self: Weak<Self>,
    state: Mutex<TrackerState>,
    statistics: Mutex<DisplayPresentStatistics>,
}

impl VariableRefreshRateStatistic {
    /// Builds the tracker and arms the first present-timeout window. The
    /// display is assumed to be in the `On` power mode at construction.
    ///
    /// Fails when the configured rates cannot support interval arithmetic;
    /// a zero frequency is a configuration error, not a runtime one.
    pub fn new(
        context: Arc<dyn DisplayContextProvider>,
        clock: Arc<dyn MonotonicClock>,
        event_queue: Arc<EventQueue>,
        max_frame_rate: i32,
        max_te_frequency: i32,
        update_period_ns: i64,
    ) -> Result<Arc<Self>> {
        if max_frame_rate <= 0 {
            bail!("max frame rate must be positive, got {}", max_frame_rate);
        }
        if max_te_frequency <= 0 {
            bail!(
                "max TE frequency must be positive, got {}",
                max_te_frequency
            );
        }
        if update_period_ns < 0 {
            bail!("update period must be >= 0, got {}ns", update_period_ns);
        }
        let min_frame_interval_ns = round_divide(NSEC_PER_SEC, max_frame_rate as i64);
        if min_frame_interval_ns <= 0 {
            bail!(
                "max frame rate {} leaves no whole-nanosecond frame interval",
                max_frame_rate
            );
        }

        let stat = Arc::new_cyclic(|weak_self| Self {
            context,
            clock,
            event_queue,
            max_frame_rate,
            max_te_frequency,
            min_frame_interval_ns,
            update_period_ns,
            weak_self: weak_self.clone(),
            state: Mutex::new(TrackerState {
                profile: PresentProfile::default(),
                te_frequency: max_frame_rate,
                te_interval_ns: round_divide(NSEC_PER_SEC, max_frame_rate as i64),
                last_present_time_ns: 0,
            }),
            statistics: Mutex::new(DisplayPresentStatistics::default()),
        });

        stat.arm_present_timeout();
        if update_period_ns > 0 {
            stat.arm_statistics_update();
        }
        Ok(stat)
    }

    /// Observes one present event. Re-arms the present timeout, classifies
    /// the frame's vsync count, and bumps the matching profile record.
    pub fn on_present(&self, present_time_ns: i64, flags: u32) {
        self.event_queue.drop_event(TimedEventType::PresentTimeout);
        self.arm_present_timeout();

        let profile = {
            let mut state = self.state.lock().unwrap();
            let num_vsync = round_divide(
                present_time_ns - state.last_present_time_ns,
                state.te_interval_ns,
            )
            .clamp(1, self.max_frame_rate as i64) as i32;

            state.profile.config.brightness_mode = self.resolve_brightness_mode();
            state.profile.num_vsync = if has_present_frame_flag(flags, PRESENTING_WHEN_DOZE) {
                // While dozing the panel only presents at the fixed low-power
                // cadence; the measured interval is not trusted.
                state.te_frequency / LOW_POWER_FRAME_RATE
            } else {
                num_vsync
            };
            state.last_present_time_ns = present_time_ns;
            state.profile
        };

        self.record_sample(profile, present_time_ns);
    }

    /// Observes a display power transition. Entering a suspended mode drops
    /// the present timeout and records one sample against the pre-transition
    /// profile; leaving one re-arms a full timeout window.
    pub fn on_power_state_change(&self, from: PowerMode, to: PowerMode) {
        let (previous_profile, stored_mode) = {
            let mut state = self.state.lock().unwrap();
            let previous = state.profile;
            state.profile.config.power_mode = to;
            (previous, previous.config.power_mode)
        };
        if stored_mode != from {
            error!(
                "power mode mismatch between stored state ({:?}) and reported transition ({:?})",
                stored_mode, from
            );
        }

        if to.is_suspended() {
            self.event_queue.drop_event(TimedEventType::PresentTimeout);
            self.record_sample(previous_profile, self.clock.now_ns());
        } else if from.is_suspended() {
            // No sample on the resume edge; the next present or timeout
            // records one.
            self.arm_present_timeout();
        }
    }

    /// Fired by the event queue when the armed deadline elapses without a
    /// present. Records a cap-rate sample and re-arms, so active profiles
    /// keep a recent sample even under present starvation.
    pub fn on_present_timeout(&self) {
        let (profile, suspended) = {
            let mut state = self.state.lock().unwrap();
            state.profile.config.brightness_mode = self.resolve_brightness_mode();
            state.profile.num_vsync = self.max_frame_rate;
            (state.profile, state.profile.config.power_mode.is_suspended())
        };

        self.record_sample(profile, self.clock.now_ns());

        // A suspend may have raced this fire after it left the pending set;
        // the sample above is allowed, re-arming is not.
        if !suspended {
            self.arm_present_timeout();
        }
    }

    /// Full snapshot of the statistics table. Non-destructive.
    pub fn get_statistics(&self) -> DisplayPresentStatistics {
        self.statistics.lock().unwrap().clone()
    }

    /// Delta snapshot: returns only records mutated since the last call and
    /// clears their dirty flag atomically with the read.
    pub fn get_updated_statistics(&self) -> DisplayPresentStatistics {
        let mut statistics = self.statistics.lock().unwrap();
        let mut updated = DisplayPresentStatistics::default();
        for (profile, record) in statistics.iter_mut() {
            if record.updated {
                updated.insert(*profile, *record);
                record.updated = false;
            }
        }
        updated
    }

    /// Switches the active configuration and recomputes the TE tick interval.
    pub fn set_active_vrr_configuration(&self, active_config_id: i32, te_frequency: i32) {
        let te_interval_ns = if te_frequency > 0 {
            round_divide(NSEC_PER_SEC, te_frequency as i64)
        } else {
            0
        };
        if te_interval_ns <= 0 {
            error!(
                "ignoring TE frequency {} for config {}; keeping previous interval",
                te_frequency, active_config_id
            );
            let mut state = self.state.lock().unwrap();
            state.profile.config.active_config_id = active_config_id;
            return;
        }
        if te_frequency % self.max_frame_rate != 0 {
            warn!(
                "TE frequency {} does not align with the maximum frame rate {} as a multiplier",
                te_frequency, self.max_frame_rate
            );
        }
        let mut state = self.state.lock().unwrap();
        state.profile.config.active_config_id = active_config_id;
        state.te_frequency = te_frequency;
        state.te_interval_ns = te_interval_ns;
    }

    pub fn max_frame_rate(&self) -> i32 {
        self.max_frame_rate
    }

    pub fn max_te_frequency(&self) -> i32 {
        self.max_te_frequency
    }

    pub fn min_frame_interval_ns(&self) -> i64 {
        self.min_frame_interval_ns
    }

    pub fn te_interval_ns(&self) -> i64 {
        self.state.lock().unwrap().te_interval_ns
    }

    fn resolve_brightness_mode(&self) -> BrightnessMode {
        match self.context.brightness_mode() {
            BrightnessMode::Invalid => BrightnessMode::Normal,
            mode => mode,
        }
    }

    fn record_sample(&self, profile: PresentProfile, timestamp_ns: i64) {
        let mut statistics = self.statistics.lock().unwrap();
        let record = statistics.entry(profile).or_default();
        record.count += 1;
        record.last_timestamp_ns = timestamp_ns;
        record.updated = true;
    }

    fn arm_present_timeout(&self) {
        let weak = self.weak_self.clone();
        self.event_queue.schedule(TimedEvent::new(
            TimedEventType::PresentTimeout,
            self.clock.now_ns() + MAX_PRESENT_INTERVAL_NS,
            Box::new(move || {
                if let Some(stat) = weak.upgrade() {
                    stat.on_present_timeout();
                }
            }),
        ));
    }

    fn arm_statistics_update(&self) {
        let weak = self.weak_self.clone();
        self.event_queue.schedule(TimedEvent::new(
            TimedEventType::StatisticsUpdate,
            self.clock.now_ns() + self.update_period_ns,
            Box::new(move || {
                if let Some(stat) = weak.upgrade() {
                    stat.update_statistic();
                }
            }),
        ));
    }

    /// Periodic debug dump of the whole table, self-perpetuating while the
    /// tracker is alive. Enabled by a positive update period.
    fn update_statistic(&self) {
        let snapshot = self.get_statistics();
        let mut entries: Vec<_> = snapshot.into_iter().collect();
        entries.sort_by_key(|(profile, _)| *profile);
        for (profile, record) in entries {
            debug!(
                "power mode = {:?}, id = {}, brightness mode = {:?}, vsync = {} : count = {}, last entry time = {}",
                profile.config.power_mode,
                profile.config.active_config_id,
                profile.config.brightness_mode,
                profile.num_vsync,
                record.count,
                record.last_timestamp_ns,
            );
        }
        self.arm_statistics_update();
    }
}
