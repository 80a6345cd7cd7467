//! Status LED driver and flash sequences.
//!
//! Three single-colour LEDs on plain GPIO outputs: the coin holder light,
//! the RFID reader ring and the IR emitter (kept on while running).
//!
//! A flash sequence is a chain of one-shot continuations: each step writes
//! one level and hands back the next step plus its delay, which the caller
//! registers with the scheduler.

use chrono::TimeDelta;

use crate::app::ports::{HardwarePort, Level};
use crate::error::{Error, Result};
use crate::pins;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Led {
    Holder,
    Reader,
    Ir,
}

impl Led {
    pub const ALL: [Led; 3] = [Led::Holder, Led::Reader, Led::Ir];

    pub fn pin(self) -> u8 {
        match self {
            Self::Holder => pins::LED_HOLDER_GPIO,
            Self::Reader => pins::LED_READER_GPIO,
            Self::Ir => pins::IR_TX_GPIO,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Holder => "holder",
            Self::Reader => "reader",
            Self::Ir => "ir",
        }
    }

    /// Look an LED up by its wiring name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|led| led.name() == name)
            .ok_or_else(|| Error::UnknownLed(name.to_string()))
    }

    fn index(self) -> usize {
        self as usize
    }
}

// ── Driver ────────────────────────────────────────────────────

pub struct StatusLeds {
    levels: [Level; 3],
}

impl Default for StatusLeds {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLeds {
    pub fn new() -> Self {
        Self {
            levels: [Level::Low; 3],
        }
    }

    pub fn set(&mut self, led: Led, level: Level, hw: &mut impl HardwarePort) -> Result<()> {
        hw.write_digital(led.pin(), level)?;
        self.levels[led.index()] = level;
        Ok(())
    }

    /// Drive every LED low.  Keeps going past failures; reports the first.
    pub fn all_off(&mut self, hw: &mut impl HardwarePort) -> Result<()> {
        let mut first_err = None;
        for led in Led::ALL {
            if let Err(e) = self.set(led, Level::Low, hw) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn level(&self, led: Led) -> Level {
        self.levels[led.index()]
    }
}

// ── Flash sequences ───────────────────────────────────────────

/// One pending step of a flash sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedFlash {
    pub led: Led,
    /// Toggles still to come after this step.
    pub remaining: u8,
    pub period: TimeDelta,
    /// Level written by this step.
    pub level: Level,
    /// Level the LED settles at.
    pub end: Level,
}

/// What follows a flash step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashNext {
    Continue(LedFlash),
    Settle(Led, Level),
}

impl LedFlash {
    /// `times` toggles starting low, `period` apart, then settle at `end`.
    pub fn new(led: Led, times: u8, period: TimeDelta, end: Level) -> Self {
        Self {
            led,
            remaining: times,
            period,
            level: Level::Low,
            end,
        }
    }

    /// Reader flash for a tag that is not in the player directory.
    pub fn unknown_tag() -> Self {
        Self::new(Led::Reader, 4, TimeDelta::milliseconds(100), Level::High)
    }

    /// Reader flash acknowledging a checkin.
    pub fn checkin() -> Self {
        Self::new(Led::Reader, 10, TimeDelta::milliseconds(50), Level::High)
    }

    /// Reader flash for a checkout without credit.
    pub fn zero_credit() -> Self {
        Self::checkin()
    }

    /// The level to write now and what comes `period` later.
    pub fn step(self) -> (Level, FlashNext) {
        let next = if self.remaining > 0 {
            FlashNext::Continue(Self {
                remaining: self.remaining - 1,
                level: self.level.toggled(),
                ..self
            })
        } else {
            FlashNext::Settle(self.led, self.end)
        };
        (self.level, next)
    }
}
