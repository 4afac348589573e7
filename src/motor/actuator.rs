// Wheel drive output: one PWM channel plus a brake line
//
// Brake line low = brake on, high = free running. Releasing the brake always
// happens before any non-zero duty is written, and the duty is back at
// standstill before the brake is engaged again.

use tracing::trace;

use crate::config::{DUTY_CENTER, DUTY_PER_PERCENT, PID_LIMIT};
use crate::hw::{OutputPin, PwmPin};

/// Map a drive percentage onto a duty cycle, clamping to ±100 %
pub fn percent_to_duty(percent: f32) -> f32 {
    DUTY_CENTER + percent.clamp(-PID_LIMIT, PID_LIMIT) * DUTY_PER_PERCENT
}

pub struct WheelActuator {
    drive: Box<dyn PwmPin>,
    brake: Box<dyn OutputPin>,
    percent: f32,
}

impl WheelActuator {
    /// Starts braked at standstill
    pub fn new(drive: Box<dyn PwmPin>, brake: Box<dyn OutputPin>) -> Self {
        let mut actuator = Self {
            drive,
            brake,
            percent: 0.0,
        };
        actuator.engage_brake();
        actuator
    }

    pub fn is_braked(&self) -> bool {
        !self.brake.is_set_high()
    }

    pub fn percent(&self) -> f32 {
        self.percent
    }

    pub fn release_brake(&mut self) {
        self.brake.set_high();
    }

    pub fn engage_brake(&mut self) {
        self.write(0.0);
        self.brake.set_low();
    }

    /// Apply a signed drive percentage. While braked only standstill is
    /// written, whatever the request.
    pub fn set_percent(&mut self, percent: f32) {
        if self.is_braked() && percent != 0.0 {
            trace!("Ignoring drive of {:.2}% while braked", percent);
            self.write(0.0);
            return;
        }
        self.write(percent);
    }

    fn write(&mut self, percent: f32) {
        self.percent = percent.clamp(-PID_LIMIT, PID_LIMIT);
        self.drive.set_duty(percent_to_duty(self.percent));
    }
}
