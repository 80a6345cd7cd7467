//! Hardware adapter: bridges embedded-hal peripherals to [`HardwarePort`].
//!
//! Owns the IR receiver input, the motor PWM channel, the three LED outputs,
//! a microsecond delay and the RFID reader.  Any board crate that implements
//! the embedded-hal 1.0 traits plugs in here; the binary wires it to the
//! simulated pins in [`sim`](super::sim).

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin, PinState};
use embedded_hal::pwm::SetDutyCycle;
use log::{debug, info};

use crate::app::ports::{HardwarePort, Level, TagReader};
use crate::error::{ActuatorError, Result, SensorError};
use crate::pins;

/// The three LED outputs.
pub struct LedPins<O> {
    pub holder: O,
    pub reader: O,
    pub ir_tx: O,
}

/// Concrete adapter that combines all peripherals behind [`HardwarePort`].
pub struct HalHardware<I, M, O, D, T> {
    ir_rx: I,
    motor: M,
    leds: LedPins<O>,
    delay: D,
    tags: T,
    pwm_range: u16,
    released: bool,
}

impl<I, M, O, D, T> HalHardware<I, M, O, D, T>
where
    I: InputPin,
    M: SetDutyCycle,
    O: OutputPin,
    D: DelayNs,
    T: TagReader,
{
    pub fn new(ir_rx: I, motor: M, leds: LedPins<O>, delay: D, tags: T) -> Self {
        Self {
            ir_rx,
            motor,
            leds,
            delay,
            tags,
            pwm_range: pins::PWM_RANGE,
            released: false,
        }
    }

    fn led_pin(&mut self, pin: u8) -> Option<&mut O> {
        match pin {
            pins::LED_HOLDER_GPIO => Some(&mut self.leds.holder),
            pins::LED_READER_GPIO => Some(&mut self.leds.reader),
            pins::IR_TX_GPIO => Some(&mut self.leds.ir_tx),
            _ => None,
        }
    }
}

// ── HardwarePort implementation ───────────────────────────────

impl<I, M, O, D, T> HardwarePort for HalHardware<I, M, O, D, T>
where
    I: InputPin,
    M: SetDutyCycle,
    O: OutputPin,
    D: DelayNs,
    T: TagReader,
{
    fn read_digital(&mut self, pin: u8) -> Result<Level> {
        if pin != pins::IR_RX_GPIO {
            return Err(SensorError::NoSuchPin(pin).into());
        }
        let high = self
            .ir_rx
            .is_high()
            .map_err(|_| SensorError::GpioReadFailed)?;
        Ok(Level::from(high))
    }

    fn write_pwm(&mut self, duty: u16) -> Result<()> {
        if duty > self.pwm_range {
            return Err(ActuatorError::DutyOutOfRange(duty).into());
        }
        debug!("PWM GPIO{} <- {}/{}", pins::MOTOR_PWM_GPIO, duty, self.pwm_range);
        self.motor
            .set_duty_cycle_fraction(duty, self.pwm_range)
            .map_err(|_| ActuatorError::PwmWriteFailed.into())
    }

    fn write_digital(&mut self, pin: u8, level: Level) -> Result<()> {
        let out = self.led_pin(pin).ok_or(ActuatorError::NoSuchPin(pin))?;
        out.set_state(PinState::from(level.is_high()))
            .map_err(|_| ActuatorError::GpioWriteFailed.into())
    }

    fn read_tag_uid(&mut self) -> Option<u64> {
        if self.released {
            return None;
        }
        self.tags.read_uid()
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.tags.cleanup();
        info!("Hardware released");
    }
}
