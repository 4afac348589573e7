// Physical I/O seams used by the wheels, kicker and dribbler
//
// On the robot these wrap PWM and GPIO peripherals. `sim` provides in-memory
// pins and a motor plant so the runtime can run without hardware.

pub mod sim;

/// PWM output, duty cycle in [0, 1]
pub trait PwmPin: Send {
    fn set_duty(&mut self, duty: f32);
    fn duty(&self) -> f32;
}

/// Digital output line
pub trait OutputPin: Send {
    fn set_high(&mut self);
    fn set_low(&mut self);
    fn is_set_high(&self) -> bool;
}

/// Digital input line, readable from interrupt context
pub trait InputPin: Send + Sync {
    fn is_high(&self) -> bool;
}
