//! Simulated dispenser board.
//!
//! Provides embedded-hal pins backed by a rotor model so the binary runs on
//! a host without hardware.  The rotor turns one half-rotation every
//! [`HALF_ROTATION_MS`] while the motor duty is non-zero, and the IR
//! receiver sees the marker/slot pattern the classifier expects:
//!
//! ```text
//!  phase ms   0 ......... 300  330  360  390 ....... 480
//!  loaded     LOW ....... HIGH LOW  HIGH LOW ....... LOW
//!  empty      LOW ....... HIGH ........... LOW ..... LOW   (wide slot)
//! ```

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, InputPin, OutputPin};
use embedded_hal::pwm::{self, SetDutyCycle};
use log::debug;

use crate::app::ports::TagReader;
use crate::pins;

use super::hardware::{HalHardware, LedPins};

/// Duration of one simulated half rotation at full speed.
pub const HALF_ROTATION_MS: f64 = 480.0;

// ── Rotor model ───────────────────────────────────────────────

#[derive(Debug)]
struct RotorModel {
    coins: u32,
    position_ms: f64,
    cycles_seen: u64,
    duty: u16,
    last: Instant,
}

impl RotorModel {
    fn new(coins: u32) -> Self {
        Self {
            coins,
            position_ms: 0.0,
            cycles_seen: 0,
            duty: 0,
            last: Instant::now(),
        }
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64() * 1000.0;
        self.last = now;
        if self.duty > 0 {
            self.position_ms += dt;
        }
        let cycle = (self.position_ms / HALF_ROTATION_MS) as u64;
        if cycle > self.cycles_seen {
            self.coins = self
                .coins
                .saturating_sub((cycle - self.cycles_seen) as u32);
            self.cycles_seen = cycle;
        }
    }

    fn ir_high(&mut self) -> bool {
        self.advance();
        let phase = self.position_ms % HALF_ROTATION_MS;
        if self.coins > 0 {
            (300.0..330.0).contains(&phase) || (360.0..390.0).contains(&phase)
        } else {
            (300.0..420.0).contains(&phase)
        }
    }

    fn set_duty(&mut self, duty: u16) {
        self.advance();
        self.duty = duty;
    }
}

/// Shared handle to the rotor model.
#[derive(Debug, Clone)]
pub struct SimRotor(Rc<RefCell<RotorModel>>);

impl SimRotor {
    pub fn new(coins: u32) -> Self {
        Self(Rc::new(RefCell::new(RotorModel::new(coins))))
    }

    pub fn coins(&self) -> u32 {
        self.0.borrow().coins
    }

    pub fn duty(&self) -> u16 {
        self.0.borrow().duty
    }
}

// ── embedded-hal pins ─────────────────────────────────────────

/// IR receiver input.
pub struct SimIrPin(SimRotor);

impl digital::ErrorType for SimIrPin {
    type Error = Infallible;
}

impl InputPin for SimIrPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.0.borrow_mut().ir_high())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|h| !h)
    }
}

/// Motor PWM channel.
pub struct SimMotor(SimRotor);

impl pwm::ErrorType for SimMotor {
    type Error = Infallible;
}

impl SetDutyCycle for SimMotor {
    fn max_duty_cycle(&self) -> u16 {
        pins::PWM_RANGE
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.0.0.borrow_mut().set_duty(duty);
        Ok(())
    }
}

/// LED output that logs level changes.
pub struct SimLed {
    gpio: u8,
    high: bool,
}

impl SimLed {
    pub fn new(gpio: u8) -> Self {
        Self { gpio, high: false }
    }
}

impl digital::ErrorType for SimLed {
    type Error = Infallible;
}

impl OutputPin for SimLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.high {
            debug!("GPIO{} LOW", self.gpio);
        }
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if !self.high {
            debug!("GPIO{} HIGH", self.gpio);
        }
        self.high = true;
        Ok(())
    }
}

/// Thread-sleep delay.
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns.into()));
    }
}

/// Reader with no tag ever present.
pub struct NoTags;

impl TagReader for NoTags {
    fn read_uid(&mut self) -> Option<u64> {
        None
    }
}

/// Fully wired simulated board.
pub type SimHardware = HalHardware<SimIrPin, SimMotor, SimLed, StdDelay, NoTags>;

/// Build a simulated board whose hopper holds `coins` coins.
pub fn board(coins: u32) -> (SimHardware, SimRotor) {
    let rotor = SimRotor::new(coins);
    let leds = LedPins {
        holder: SimLed::new(pins::LED_HOLDER_GPIO),
        reader: SimLed::new(pins::LED_READER_GPIO),
        ir_tx: SimLed::new(pins::IR_TX_GPIO),
    };
    let hw = HalHardware::new(
        SimIrPin(rotor.clone()),
        SimMotor(rotor.clone()),
        leds,
        StdDelay,
        NoTags,
    );
    (hw, rotor)
}
