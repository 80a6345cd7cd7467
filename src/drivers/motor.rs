//! Rotor motor driver.
//!
//! The motor has three operating points, each a fixed PWM duty from the
//! configuration: off, forward (dispense / calibrate) and a faster reverse
//! used to clear jams.  This driver is a dumb actuator: it only remembers
//! the last duty it wrote so repeated commands cost nothing.

use crate::app::ports::HardwarePort;
use crate::config::DispenserConfig;
use crate::error::{ActuatorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorCommand {
    #[default]
    Off,
    Forward,
    Reverse,
}

impl MotorCommand {
    /// PWM duty for this operating point.
    pub fn duty(self, config: &DispenserConfig) -> u16 {
        match self {
            Self::Off => config.motor_off_duty,
            Self::Forward => config.motor_forward_duty,
            Self::Reverse => config.motor_reverse_duty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    /// Nothing written yet.
    Unknown,
    Stopped,
    Running(MotorCommand),
}

pub struct MotorDriver {
    state: MotorState,
    hw_duty: Option<u16>,
    range: u16,
}

impl MotorDriver {
    pub fn new(range: u16) -> Self {
        Self {
            state: MotorState::Unknown,
            hw_duty: None,
            range,
        }
    }

    /// Drive the motor to `command`.  Writes the PWM only when the duty
    /// changes; returns whether a write happened.
    pub fn apply(
        &mut self,
        command: MotorCommand,
        config: &DispenserConfig,
        hw: &mut impl HardwarePort,
    ) -> Result<bool> {
        let duty = command.duty(config);
        if duty > self.range {
            return Err(ActuatorError::DutyOutOfRange(duty).into());
        }
        if self.hw_duty == Some(duty) {
            return Ok(false);
        }

        hw.write_pwm(duty)?;
        self.hw_duty = Some(duty);
        self.state = match command {
            MotorCommand::Off => MotorState::Stopped,
            running => MotorState::Running(running),
        };
        Ok(true)
    }

    /// Write the off duty regardless of the cached state.
    pub fn stop(&mut self, config: &DispenserConfig, hw: &mut impl HardwarePort) -> Result<()> {
        hw.write_pwm(config.motor_off_duty)?;
        self.hw_duty = Some(config.motor_off_duty);
        self.state = MotorState::Stopped;
        Ok(())
    }

    pub fn state(&self) -> MotorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, MotorState::Running(_))
    }

    pub fn current_duty(&self) -> Option<u16> {
        self.hw_duty
    }
}
