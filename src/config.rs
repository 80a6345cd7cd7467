//! System configuration parameters
//!
//! Two layers:
//!
//! - [`DispenserConfig`]: device tunables (motor duties, IR timing windows,
//!   job cadences).  Loaded once at boot from a JSON file; every field has
//!   a default so a partial file is fine.
//! - [`AreaConfig`]: game rules pushed by the remote area document
//!   (`tick_seconds`, `tick_amount`, `limit`).

use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::TimeDelta;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pins;

/// Default location of the device configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/boot/dispenser.json";

/// Upper bound on debounce samples per poll; keeps the poll callback short.
pub const MAX_IR_SAMPLES: u8 = 32;

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispenserConfig {
    // --- Motor ---
    /// PWM duty that drives the rotor forward.
    pub motor_forward_duty: u16,
    /// PWM duty that drives the rotor in reverse (jam recovery).
    pub motor_reverse_duty: u16,
    /// PWM duty that stops the rotor.
    pub motor_off_duty: u16,
    /// PWM range of the motor output.
    pub pwm_range: u16,

    // --- IR sensor ---
    /// Samples per poll for the majority vote.
    pub ir_samples: u8,
    /// Delay between two samples (microseconds).
    pub ir_sample_delay_us: u32,
    /// A rising edge this long after the previous edge is the alignment marker.
    pub detect_big_ms: u32,
    /// A falling edge this long after the previous edge flags an empty slot.
    pub detect_small_ms: u32,

    // --- Dispense ---
    /// Consecutive empty half rotations that abort a dispense.
    pub empty_streak_limit: u8,
    /// No half rotation for this long while dispensing means a jam.
    pub jam_timeout_ms: u32,
    /// How long the motor reverses during jam recovery.
    pub jam_reverse_ms: u32,
    /// Delay before the holder/reader LEDs return to idle after a dispense.
    pub led_restore_ms: u32,

    // --- Tags ---
    /// Minimum time between two presence toggles of the same tag.
    pub read_grace_ms: u32,

    // --- Timing ---
    /// Scheduler polling period (milliseconds).
    pub poll_period_ms: u32,
    /// IR rotor poll interval (milliseconds, wall-clock aligned).
    pub rotor_poll_ms: u32,
    /// RFID poll interval (milliseconds).
    pub tag_poll_ms: u32,
    /// Jam watchdog interval (milliseconds, wall-clock aligned).
    pub jam_check_ms: u32,
    /// Credit accrual interval (milliseconds).
    pub credit_tick_ms: u32,
    /// Remote watch health check interval (seconds).
    pub watch_check_secs: u32,

    // --- Identity ---
    /// File holding the area identifier.
    pub area_file: String,
}

impl Default for DispenserConfig {
    fn default() -> Self {
        Self {
            // Motor
            motor_forward_duty: 100,
            motor_reverse_duty: 200,
            motor_off_duty: 0,
            pwm_range: pins::PWM_RANGE,

            // IR sensor
            ir_samples: 10,
            ir_sample_delay_us: 1,
            detect_big_ms: 200,
            detect_small_ms: 100,

            // Dispense
            empty_streak_limit: 3,
            jam_timeout_ms: 2000,
            jam_reverse_ms: 400,
            led_restore_ms: 3000,

            // Tags
            read_grace_ms: 3000,

            // Timing
            poll_period_ms: 1,
            rotor_poll_ms: 4,
            tag_poll_ms: 500,
            jam_check_ms: 1000,
            credit_tick_ms: 15_000,
            watch_check_secs: 60,

            area_file: "/boot/area".into(),
        }
    }
}

impl DispenserConfig {
    /// Load from a JSON file.  A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config {} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        config.validate()?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Reject values the state machine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.ir_samples == 0 || self.ir_samples > MAX_IR_SAMPLES {
            return Err(Error::Config("ir_samples must be within 1..=32"));
        }
        if self.detect_small_ms >= self.detect_big_ms {
            return Err(Error::Config("detect_small_ms must be below detect_big_ms"));
        }
        if [self.motor_forward_duty, self.motor_reverse_duty, self.motor_off_duty]
            .iter()
            .any(|&d| d > self.pwm_range)
        {
            return Err(Error::Config("motor duty exceeds pwm_range"));
        }
        if self.empty_streak_limit == 0 {
            return Err(Error::Config("empty_streak_limit must be positive"));
        }
        if [
            self.poll_period_ms,
            self.rotor_poll_ms,
            self.tag_poll_ms,
            self.jam_check_ms,
            self.credit_tick_ms,
            self.watch_check_secs,
        ]
        .contains(&0)
        {
            return Err(Error::Config("job cadences must be positive"));
        }
        Ok(())
    }

    pub fn detect_big(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.detect_big_ms.into())
    }

    pub fn detect_small(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.detect_small_ms.into())
    }

    pub fn jam_timeout(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.jam_timeout_ms.into())
    }

    pub fn jam_reverse(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.jam_reverse_ms.into())
    }

    pub fn led_restore(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.led_restore_ms.into())
    }

    pub fn read_grace(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.read_grace_ms.into())
    }

    pub fn poll_period(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.poll_period_ms.into())
    }
}

/// Read the area identifier: first line of `path`, trimmed.
pub fn read_area_id(path: impl AsRef<Path>) -> Result<String> {
    let raw = fs::read_to_string(path).map_err(|_| Error::Config("area file unreadable"))?;
    let area = raw.lines().next().unwrap_or_default().trim();
    if area.is_empty() {
        return Err(Error::Config("no area given"));
    }
    Ok(area.to_string())
}

// ---------------------------------------------------------------------------
// Remote game rules
// ---------------------------------------------------------------------------

/// Credit rules of the area this dispenser is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// Seconds between two credit ticks for a present player.
    pub tick_seconds: u32,
    /// Credit added per tick (may be negative).
    pub tick_amount: i64,
    /// Upper credit bound.
    pub limit: i64,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 300,
            tick_amount: 1,
            limit: 25,
        }
    }
}

impl AreaConfig {
    pub fn tick_interval(&self) -> TimeDelta {
        TimeDelta::seconds(self.tick_seconds.max(1).into())
    }
}
