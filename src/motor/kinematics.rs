// Omniwheel inverse kinematics for the three-wheel base
// Converts a robot-frame drive command into per-wheel speed targets.

use std::f32::consts::PI;

use crate::config::{HEADING_OFFSET_DEG, SPEED_SCALE};
use crate::messages::{DriveCommand, WheelId, WheelTarget};

/// Robot-relative strafe heading to the unit-circle convention, in [0, 360)
pub fn heading_to_unit_circle(heading: i16) -> i32 {
    (heading as i32 + HEADING_OFFSET_DEG).rem_euclid(360)
}

fn deg_to_rad(deg: f32) -> f32 {
    deg * (PI / 180.0)
}

/// Speed one wheel needs, in wheel-percent units, to move the base at
/// `speed_mps` towards `heading_deg` (unit circle)
pub fn wheel_speed(wheel: WheelId, heading_deg: i32, speed_mps: f32) -> f32 {
    SPEED_SCALE * speed_mps * deg_to_rad(wheel.angle_deg() - heading_deg as f32).cos()
}

/// Convert a drive command to the three wheel targets
///
/// No clamping happens here; a fast enough command yields targets beyond
/// ±100 and the wheel loop limits its own output.
/// The rotation rate is not mixed in: it travels to each wheel separately as
/// the rotation bias.
pub fn wheel_targets(cmd: &DriveCommand) -> [WheelTarget; 3] {
    let heading = heading_to_unit_circle(cmd.heading);
    // mm/s -> m/s
    let speed_mps = cmd.linear_speed as f32 / 1000.0;

    WheelId::ALL.map(|wheel| WheelTarget {
        wheel,
        speed_percent: wheel_speed(wheel, heading, speed_mps),
    })
}
