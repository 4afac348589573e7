// Types passed between the packet dispatcher, kinematics and the wheels

use serde::{Deserialize, Serialize};

use crate::config::{WHEEL_ANGLE_A, WHEEL_ANGLE_B, WHEEL_ANGLE_C};

// Robot-frame command, one per accepted drive frame
// heading is the robot-relative strafe direction in degrees, speeds in mm/s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveCommand {
    pub heading: i16,
    pub linear_speed: i16,
    pub rotation_rate: i16,
}

impl DriveCommand {
    pub fn new(heading: i16, linear_speed: i16, rotation_rate: i16) -> Self {
        Self {
            heading,
            linear_speed,
            rotation_rate,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.linear_speed == 0 && self.rotation_rate == 0
    }
}

/// The three omniwheels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelId {
    A,
    B,
    C,
}

impl WheelId {
    pub const ALL: [WheelId; 3] = [WheelId::A, WheelId::B, WheelId::C];

    /// Mounting angle on the unit circle, degrees
    pub fn angle_deg(self) -> f32 {
        match self {
            WheelId::A => WHEEL_ANGLE_A,
            WheelId::B => WHEEL_ANGLE_B,
            WheelId::C => WHEEL_ANGLE_C,
        }
    }

    pub fn index(self) -> usize {
        match self {
            WheelId::A => 0,
            WheelId::B => 1,
            WheelId::C => 2,
        }
    }
}

impl std::fmt::Display for WheelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WheelId::A => "A",
            WheelId::B => "B",
            WheelId::C => "C",
        };
        f.write_str(name)
    }
}

// Wheel-frame target produced by kinematics
// speed_percent is not clamped here; the wheel loop clamps its output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelTarget {
    pub wheel: WheelId,
    pub speed_percent: f32,
}

/// Control state of one wheel. `Braked` is the only safe power-off state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WheelMode {
    #[default]
    Braked,
    OpenLoop,
    ClosedLoopPid,
}

/// Snapshot of a wheel for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelTelemetry {
    pub wheel: WheelId,
    pub mode: WheelMode,
    pub goal_speed: f32,
    pub set_point: f32,
    /// Measured speed, m/s
    pub current_speed: f32,
    pub pid_output: f32,
    /// Percentage currently applied to the drive output
    pub drive_percent: f32,
    pub tick_attached: bool,
}
