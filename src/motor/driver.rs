// High-level driver for the omni base
//
// Combines kinematics and the three wheel controllers to provide a simple
// API for driving the base.

use tracing::debug;

use super::kinematics::wheel_targets;
use super::wheel::{Wheel, WheelProbe};
use crate::messages::{DriveCommand, WheelId, WheelTelemetry};

pub struct OmniDriver {
    wheels: [Wheel; 3], // [A, B, C]
    goal_speed: i16,
}

impl OmniDriver {
    pub fn new(a: Wheel, b: Wheel, c: Wheel) -> Self {
        debug_assert_eq!([a.id(), b.id(), c.id()], WheelId::ALL);
        Self {
            wheels: [a, b, c],
            goal_speed: 0,
        }
    }

    /// Send a robot-frame command to the wheels
    ///
    /// The rotation rate goes to every wheel unscaled as its rotation bias.
    pub fn drive(&mut self, cmd: &DriveCommand) {
        if cmd.is_zero() {
            self.stop();
            return;
        }
        self.goal_speed = cmd.linear_speed;
        let targets = wheel_targets(cmd);
        debug!(
            "Wheel targets: A={:.2}% B={:.2}% C={:.2}% rotation={}",
            targets[0].speed_percent,
            targets[1].speed_percent,
            targets[2].speed_percent,
            cmd.rotation_rate
        );

        for target in targets {
            self.wheels[target.wheel.index()].drive(target.speed_percent, cmd.rotation_rate as i32);
        }
    }

    /// Brake all wheels
    pub fn stop(&mut self) {
        debug!("Stopping all wheels");
        self.goal_speed = 0;
        for wheel in &mut self.wheels {
            wheel.stop();
        }
    }

    pub fn wheel(&self, id: WheelId) -> &Wheel {
        &self.wheels[id.index()]
    }

    /// Linear speed of the command in force, mm/s
    pub fn goal_speed(&self) -> i16 {
        self.goal_speed
    }

    pub fn telemetry(&self) -> [WheelTelemetry; 3] {
        [
            self.wheels[0].telemetry(),
            self.wheels[1].telemetry(),
            self.wheels[2].telemetry(),
        ]
    }

    pub fn probes(&self) -> [WheelProbe; 3] {
        [
            self.wheels[0].probe(),
            self.wheels[1].probe(),
            self.wheels[2].probe(),
        ]
    }
}
