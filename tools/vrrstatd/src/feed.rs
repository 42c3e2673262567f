// SPDX-License-Identifier: GPL-2.0
//
// Line-oriented event stream: `present <timestamp_ns> [flags]`,
// `power <from> <to>`, `config <id> <te_hz>`. One command per line, `#`
// starts a comment. Malformed lines are logged and skipped.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::warn;
use vrr_stats::{
    ManualClock, PowerMode, VariableRefreshRateStatistic, PRESENTING_WHEN_DOZE,
    UPDATE_REFRESH_RATE_INDICATOR_ONLY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    Present { timestamp_ns: i64, flags: u32 },
    Power { from: PowerMode, to: PowerMode },
    Config { config_id: i32, te_frequency: i32 },
}

/// Parses one stream line. Returns `None` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<FeedCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let keyword = fields.next().unwrap();
    let command = match keyword {
        "present" => {
            let timestamp_ns = fields
                .next()
                .context("present: missing timestamp")?
                .parse::<i64>()
                .context("present: timestamp is not an integer")?;
            let flags = match fields.next() {
                Some(raw) => parse_flags(raw)?,
                None => 0,
            };
            FeedCommand::Present {
                timestamp_ns,
                flags,
            }
        }
        "power" => {
            let from = fields
                .next()
                .context("power: missing source mode")?
                .parse::<PowerMode>()?;
            let to = fields
                .next()
                .context("power: missing target mode")?
                .parse::<PowerMode>()?;
            FeedCommand::Power { from, to }
        }
        "config" => {
            let config_id = fields
                .next()
                .context("config: missing id")?
                .parse::<i32>()
                .context("config: id is not an integer")?;
            let te_frequency = fields
                .next()
                .context("config: missing TE frequency")?
                .parse::<i32>()
                .context("config: TE frequency is not an integer")?;
            FeedCommand::Config {
                config_id,
                te_frequency,
            }
        }
        other => bail!("unknown command '{}'", other),
    };

    if let Some(extra) = fields.next() {
        bail!("trailing field '{}'", extra);
    }
    Ok(Some(command))
}

/// Flags field: decimal, 0x-prefixed hex, or comma-separated names
/// (`doze`, `indicator`).
fn parse_flags(raw: &str) -> Result<u32> {
    if let Some(hex) = raw.strip_prefix("0x") {
        return u32::from_str_radix(hex, 16).context("flags: bad hex value");
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse::<u32>().context("flags: bad decimal value");
    }
    let mut flags = 0;
    for name in raw.split(',') {
        flags |= match name {
            "doze" => PRESENTING_WHEN_DOZE,
            "indicator" => UPDATE_REFRESH_RATE_INDICATOR_ONLY,
            other => bail!("unknown flag '{}'", other),
        };
    }
    Ok(flags)
}

/// Reads the stream to EOF (or shutdown) and drives the tracker. In replay
/// mode the manual deadline clock follows the present timestamps so queued
/// timeouts fire relative to stream time.
pub fn run_feed<R: BufRead>(
    reader: R,
    stat: &Arc<VariableRefreshRateStatistic>,
    replay_clock: Option<&ManualClock>,
    shutdown: &AtomicBool,
) -> Result<()> {
    for line in reader.lines() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let line = line.context("failed to read event stream")?;
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(FeedCommand::Present {
                timestamp_ns,
                flags,
            })) => {
                if let Some(clock) = replay_clock {
                    clock.set_ns(timestamp_ns);
                }
                stat.on_present(timestamp_ns, flags);
            }
            Ok(Some(FeedCommand::Power { from, to })) => {
                stat.on_power_state_change(from, to);
            }
            Ok(Some(FeedCommand::Config {
                config_id,
                te_frequency,
            })) => {
                stat.set_active_vrr_configuration(config_id, te_frequency);
            }
            Err(err) => warn!("skipping malformed line '{}': {:#}", line, err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_present_with_and_without_flags() {
        assert_eq!(
            parse_line("present 16666667").unwrap(),
            Some(FeedCommand::Present {
                timestamp_ns: 16_666_667,
                flags: 0
            })
        );
        assert_eq!(
            parse_line("present 100 0x3").unwrap(),
            Some(FeedCommand::Present {
                timestamp_ns: 100,
                flags: 3
            })
        );
        assert_eq!(
            parse_line("present 100 doze,indicator").unwrap(),
            Some(FeedCommand::Present {
                timestamp_ns: 100,
                flags: PRESENTING_WHEN_DOZE | UPDATE_REFRESH_RATE_INDICATOR_ONLY
            })
        );
    }

    #[test]
    fn parses_power_and_config() {
        assert_eq!(
            parse_line("power on doze-suspend").unwrap(),
            Some(FeedCommand::Power {
                from: PowerMode::On,
                to: PowerMode::DozeSuspend
            })
        );
        assert_eq!(
            parse_line("config 2 240").unwrap(),
            Some(FeedCommand::Config {
                config_id: 2,
                te_frequency: 240
            })
        );
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("# present 1").unwrap(), None);
    }

    #[test]
    fn rejects_junk() {
        assert!(parse_line("present").is_err());
        assert!(parse_line("present abc").is_err());
        assert!(parse_line("present 100 doze extra").is_err());
        assert!(parse_line("power on").is_err());
        assert!(parse_line("power standby on").is_err());
        assert!(parse_line("config 1").is_err());
        assert!(parse_line("vsync 100").is_err());
    }
}
