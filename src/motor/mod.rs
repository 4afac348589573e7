// Motor control for the three-wheel omni base
//
// Provides:
// - Omniwheel inverse kinematics (drive command -> wheel targets)
// - Tachometer edge capture
// - PID velocity control and the per-wheel mode state machine
// - PWM/brake actuation
// - Base driver tying the three wheels together

pub mod actuator;
mod driver;
pub mod kinematics;
pub mod pid;
pub mod tacho;
pub mod wheel;

pub use actuator::WheelActuator;
pub use driver::OmniDriver;
pub use kinematics::wheel_targets;
pub use tacho::{TachCapture, TachCell, TachSample};
pub use wheel::{LoopMode, Wheel, WheelProbe};
