//! IR rotor position sensor.
//!
//! An IR beam crosses the rotor.  Each poll takes a burst of samples and
//! keeps the majority level, then feeds it to an [`EdgeClassifier`] that
//! turns edge timing into half-rotation events:
//!
//! ```text
//!   level  ──┐        ┌──┐  ┌──────┐        ┌──
//!            └────────┘  └──┘      └────────┘
//!                     ▲     ▲      ▲        ▲
//!              rising │     │      │falling │ rising
//!        (≥ big: marker)    │      │(> small: next slot empty)
//! ```
//!
//! - Rising edge at least `detect_big` after the previous edge is the
//!   alignment marker: one [`HalfRotation`] event, carrying whether the slot
//!   held a token.
//! - Falling edge more than `detect_small` after the previous edge raises
//!   the pending-empty flag, consumed by the very next marker.

use chrono::{DateTime, TimeDelta, Utc};
use log::debug;

use crate::app::ports::{HardwarePort, Level};
use crate::config::DispenserConfig;
use crate::error::Result;

/// Rotor half-turn observed at an alignment marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfRotation {
    pub has_coin: bool,
}

// ───────────────────────────────────────────────────────────────
// Debounce
// ───────────────────────────────────────────────────────────────

/// Majority vote over a sample burst.  Ties resolve low.
pub fn majority(samples: impl IntoIterator<Item = Level>) -> Level {
    let (mut high, mut low) = (0u32, 0u32);
    for s in samples {
        match s {
            Level::High => high += 1,
            Level::Low => low += 1,
        }
    }
    Level::from(high > low)
}

// ───────────────────────────────────────────────────────────────
// Edge classifier
// ───────────────────────────────────────────────────────────────

/// Turns a stream of debounced levels into half-rotation events.
#[derive(Debug, Clone)]
pub struct EdgeClassifier {
    detect_big: TimeDelta,
    detect_small: TimeDelta,
    last_level: Option<Level>,
    last_edge_at: DateTime<Utc>,
    coin_pending_empty: bool,
}

impl EdgeClassifier {
    pub fn new(detect_big: TimeDelta, detect_small: TimeDelta, now: DateTime<Utc>) -> Self {
        Self {
            detect_big,
            detect_small,
            last_level: None,
            last_edge_at: now,
            coin_pending_empty: false,
        }
    }

    /// Restart edge timing (new dispense or calibration).
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_edge_at = now;
        self.coin_pending_empty = false;
    }

    pub fn coin_pending_empty(&self) -> bool {
        self.coin_pending_empty
    }

    pub fn last_level(&self) -> Option<Level> {
        self.last_level
    }

    pub fn last_edge_at(&self) -> DateTime<Utc> {
        self.last_edge_at
    }

    /// Feed one debounced level sampled at `now`.
    pub fn observe(&mut self, level: Level, now: DateTime<Utc>) -> Option<HalfRotation> {
        let Some(previous) = self.last_level.replace(level) else {
            return None;
        };
        if previous == level {
            return None;
        }

        let elapsed = now - self.last_edge_at;
        self.last_edge_at = now;

        match level {
            Level::High if elapsed >= self.detect_big => {
                let has_coin = !self.coin_pending_empty;
                self.coin_pending_empty = false;
                Some(HalfRotation { has_coin })
            }
            Level::High => None,
            Level::Low => {
                if elapsed > self.detect_small {
                    debug!("Slow falling edge ({}ms), next slot empty", elapsed.num_milliseconds());
                    self.coin_pending_empty = true;
                }
                None
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor
// ───────────────────────────────────────────────────────────────

/// IR receiver on one digital input.
pub struct IrRotorSensor {
    pin: u8,
    samples: u8,
    sample_delay_us: u32,
    classifier: EdgeClassifier,
}

impl IrRotorSensor {
    pub fn new(pin: u8, config: &DispenserConfig, now: DateTime<Utc>) -> Self {
        Self {
            pin,
            samples: config.ir_samples,
            sample_delay_us: config.ir_sample_delay_us,
            classifier: EdgeClassifier::new(config.detect_big(), config.detect_small(), now),
        }
    }

    /// Debounced level: `samples` reads, `sample_delay_us` apart.
    pub fn sample(&self, hw: &mut impl HardwarePort) -> Result<Level> {
        let mut reads = heapless::Vec::<Level, { crate::config::MAX_IR_SAMPLES as usize }>::new();
        for i in 0..self.samples {
            if i > 0 {
                hw.delay_us(self.sample_delay_us);
            }
            let level = hw.read_digital(self.pin)?;
            if reads.push(level).is_err() {
                break;
            }
        }
        Ok(majority(reads))
    }

    /// Sample once and classify.
    pub fn poll(
        &mut self,
        hw: &mut impl HardwarePort,
        now: DateTime<Utc>,
    ) -> Result<Option<HalfRotation>> {
        let level = self.sample(hw)?;
        Ok(self.classifier.observe(level, now))
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.classifier.reset(now);
    }

    pub fn classifier(&self) -> &EdgeClassifier {
        &self.classifier
    }
}
