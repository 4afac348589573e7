// Timing, control gains, geometry and radio constants
//
// These values set the physical behaviour of the robot. Changing any of them
// changes how the base moves.
use std::time::Duration;

// Control loop
// Period of the per-wheel PID tick
pub const CONTROL_PERIOD: Duration = Duration::from_millis(1);

// PID gains (controller gain, integral time, derivative time)
pub const PID_KC: f32 = 0.5;
pub const PID_TI: f32 = 0.5;
pub const PID_TD: f32 = 0.0;

// Feed-forward bias applied by the PID (same units as its output)
pub const PID_BIAS: f32 = 1.0;

// PID input and output span, both in wheel-percent units (±100 == ±5 m/s)
pub const PID_LIMIT: f32 = 100.0;

// Rotation is divided by this before it is added to a wheel's set point and
// again to the PID output. Integer division, like the rotation field itself.
pub const ROTATION_DIVISOR: i32 = 50;

// m/s -> wheel-percent scale used by kinematics and the PID process value
pub const SPEED_SCALE: f32 = 20.0;

// Duty cycle mapping: 0.5 is standstill, ±100 % maps onto [0, 1]
pub const DUTY_CENTER: f32 = 0.5;
pub const DUTY_PER_PERCENT: f32 = 0.005;

// Geometry
// Wheel mounting angles on the unit circle (degrees)
pub const WHEEL_ANGLE_A: f32 = 160.0;
pub const WHEEL_ANGLE_B: f32 = 20.0;
pub const WHEEL_ANGLE_C: f32 = 270.0;

// Heading offset from robot-relative strafe direction to the unit circle
pub const HEADING_OFFSET_DEG: i32 = 180;

// Tachometer: 32 pulses per revolution on a 22 cm circumference
pub const PULSES_PER_ROTATION: f32 = 32.0;
pub const WHEEL_CIRCUMFERENCE_CM: f32 = 22.0;
pub const METERS_PER_PULSE: f32 = WHEEL_CIRCUMFERENCE_CM / PULSES_PER_ROTATION / 100.0;

// Top speed represented by a 100 % drive (used by the simulated plant)
pub const MAX_WHEEL_SPEED_MPS: f32 = PID_LIMIT / SPEED_SCALE;

// Wire frames
pub const FRAME_SIZE: usize = 16;
// Meaningful bytes shared by every message type, checksum last
pub const PAYLOAD_LEN: usize = 11;

// Radio
pub const ALLOWED_FREQUENCIES: [u16; 5] = [2436, 2450, 2490, 2500, 2525];
pub const DEFAULT_FREQUENCY: u16 = 2525;
pub const DEFAULT_ROBOT_ID: u8 = 1;

// Zenoh key prefix for the radio channel; the frequency is appended
pub const RADIO_KEY_PREFIX: &str = "omnibot/radio";

// Kicker / chipper solenoid pulse
pub const KICK_PULSE: Duration = Duration::from_millis(10);

// Main loop and watchdog
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(1);

// Periodic diagnostic log while driving
pub const DIAGNOSTIC_INTERVAL: Duration = Duration::from_millis(1000);

// Configuration store
pub const DEFAULT_STORE_PATH: &str = "omnibot.json";
pub const SECTION_NRF: &str = "nrf";
pub const KEY_FREQUENCY: &str = "frequency";
pub const SECTION_ROBOT: &str = "robot";
pub const KEY_ID: &str = "id";

/// Channel index (0-4) to radio frequency; out-of-range indices fall back to
/// the default frequency
pub fn frequency_for_channel(channel: u8) -> u16 {
    ALLOWED_FREQUENCIES
        .get(channel as usize)
        .copied()
        .unwrap_or(DEFAULT_FREQUENCY)
}

pub fn is_allowed_frequency(mhz: u16) -> bool {
    ALLOWED_FREQUENCIES.contains(&mhz)
}

pub fn radio_key(frequency: u16) -> String {
    format!("{}/{}", RADIO_KEY_PREFIX, frequency)
}
