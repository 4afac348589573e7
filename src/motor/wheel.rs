// Per-wheel mode state machine and closed-loop velocity control
//
// Braked -> OpenLoop | ClosedLoopPid -> Braked
//
// In ClosedLoopPid a tokio task runs the PID every CONTROL_PERIOD. Stopping
// aborts that task and the tick re-checks the mode under the lock on entry,
// so a tick that was already due cannot re-energise a braked wheel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace};

use super::actuator::WheelActuator;
use super::pid::{Pid, PidMode};
use super::tacho::TachCell;
use crate::config::{
    CONTROL_PERIOD, PID_BIAS, PID_KC, PID_LIMIT, PID_TD, PID_TI, ROTATION_DIVISOR, SPEED_SCALE,
};
use crate::messages::{WheelId, WheelMode, WheelTelemetry};

/// How `Wheel::drive` turns a target into output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    ClosedLoop,
    OpenLoop,
}

/// Rotation share added to the set point and, again, to the PID output.
/// Integer division: rotations under the divisor add nothing.
pub fn rotation_headstart(rotation: i32) -> f32 {
    (rotation / ROTATION_DIVISOR) as f32
}

fn wheel_pid() -> Pid {
    Pid::new(PID_KC, PID_TI, PID_TD, CONTROL_PERIOD.as_secs_f32())
        .with_input_limits(-PID_LIMIT, PID_LIMIT)
        .with_output_limits(-PID_LIMIT, PID_LIMIT)
        .with_bias(PID_BIAS)
}

struct WheelControl {
    mode: WheelMode,
    goal_speed: f32,
    rotation: i32,
    /// Last measured speed, m/s
    current_speed: f32,
    pid: Pid,
    actuator: WheelActuator,
    /// A control tick task is scheduled for this wheel
    tick_attached: bool,
}

impl WheelControl {
    fn brake(&mut self) {
        self.mode = WheelMode::Braked;
        self.goal_speed = 0.0;
        self.rotation = 0;
        self.pid.set_set_point(0.0);
        self.pid.set_mode(PidMode::Off);
        self.actuator.engage_brake();
    }
}

/// State shared between a wheel's owner and its control tick
pub(crate) struct WheelShared {
    id: WheelId,
    tach: Arc<TachCell>,
    control: Mutex<WheelControl>,
}

impl WheelShared {
    fn lock(&self) -> MutexGuard<'_, WheelControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One control tick. Returns false once the wheel is no longer under PID
    /// control and the tick should stop.
    fn update(&self) -> bool {
        let mut c = self.lock();
        if c.mode != WheelMode::ClosedLoopPid {
            c.tick_attached = false;
            return false;
        }

        c.current_speed = self.tach.load().speed_mps();

        if c.goal_speed == 0.0 && c.rotation == 0 {
            debug!(wheel = %self.id, "No goal left, braking");
            c.brake();
            c.tick_attached = false;
            return false;
        }

        let headstart = rotation_headstart(c.rotation);
        let set_point = c.goal_speed + headstart;
        let process_value = c.current_speed * SPEED_SCALE;
        c.pid.set_set_point(set_point);
        c.pid.set_process_value(process_value);
        let output = c.pid.compute();

        // rotation is re-added on top of the PID output so pure rotation is
        // not cancelled by the speed loop
        c.actuator.set_percent(output + headstart);
        trace!(
            wheel = %self.id,
            set_point, process_value, output,
            "PID tick"
        );
        true
    }

    fn telemetry(&self) -> WheelTelemetry {
        let c = self.lock();
        WheelTelemetry {
            wheel: self.id,
            mode: c.mode,
            goal_speed: c.goal_speed,
            set_point: c.pid.set_point(),
            current_speed: c.current_speed,
            pid_output: c.pid.last_output(),
            drive_percent: c.actuator.percent(),
            tick_attached: c.tick_attached,
        }
    }
}

/// Read-only view of a wheel for the diagnostics task
#[derive(Clone)]
pub struct WheelProbe {
    shared: Arc<WheelShared>,
}

impl WheelProbe {
    pub fn telemetry(&self) -> WheelTelemetry {
        self.shared.telemetry()
    }
}

pub struct Wheel {
    shared: Arc<WheelShared>,
    loop_mode: LoopMode,
    tick: Option<JoinHandle<()>>,
}

impl Wheel {
    pub fn new(
        id: WheelId,
        actuator: WheelActuator,
        tach: Arc<TachCell>,
        loop_mode: LoopMode,
    ) -> Self {
        let control = WheelControl {
            mode: WheelMode::Braked,
            goal_speed: 0.0,
            rotation: 0,
            current_speed: 0.0,
            pid: wheel_pid(),
            actuator,
            tick_attached: false,
        };
        let mut wheel = Self {
            shared: Arc::new(WheelShared {
                id,
                tach,
                control: Mutex::new(control),
            }),
            loop_mode,
            tick: None,
        };
        wheel.stop();
        wheel
    }

    pub fn id(&self) -> WheelId {
        self.shared.id
    }

    pub fn mode(&self) -> WheelMode {
        self.shared.lock().mode
    }

    /// True while a control tick task is scheduled
    pub fn is_attached(&self) -> bool {
        self.shared.lock().tick_attached
    }

    pub fn probe(&self) -> WheelProbe {
        WheelProbe {
            shared: self.shared.clone(),
        }
    }

    pub fn telemetry(&self) -> WheelTelemetry {
        self.shared.telemetry()
    }

    /// Drive towards `goal_speed` (wheel-percent units) with a rotation bias,
    /// using this wheel's loop mode
    pub fn drive(&mut self, goal_speed: f32, rotation: i32) {
        match self.loop_mode {
            LoopMode::ClosedLoop => self.drive_closed_loop(goal_speed, rotation),
            LoopMode::OpenLoop => self.drive_open_loop(goal_speed + rotation as f32),
        }
    }

    /// Brake, clear the set point and cancel the control tick. Idempotent.
    pub fn stop(&mut self) {
        self.detach();
        self.shared.lock().brake();
    }

    /// Apply a percentage directly, no feedback
    pub fn drive_open_loop(&mut self, percent: f32) {
        if percent == 0.0 {
            self.stop();
            return;
        }
        self.detach();

        let mut c = self.shared.lock();
        c.mode = WheelMode::OpenLoop;
        c.goal_speed = percent;
        c.rotation = 0;
        c.pid.set_mode(PidMode::Off);
        c.actuator.release_brake();
        c.actuator.set_percent(percent);
    }

    /// Hand the wheel to the PID loop
    pub fn drive_closed_loop(&mut self, goal_speed: f32, rotation: i32) {
        if goal_speed == 0.0 && rotation == 0 {
            self.stop();
            return;
        }

        {
            let mut c = self.shared.lock();
            c.actuator.release_brake();
            c.goal_speed = goal_speed;
            c.rotation = rotation;
            c.pid.set_mode(PidMode::Auto);
            c.pid.set_set_point(goal_speed + rotation_headstart(rotation));
            c.mode = WheelMode::ClosedLoopPid;
        }
        self.attach();
    }

    fn attach(&mut self) {
        if self.is_attached() {
            return;
        }
        debug!(wheel = %self.id(), "Attaching control tick");
        // handle of a tick that braked on its own
        self.tick = None;
        self.shared.lock().tick_attached = true;
        let shared = self.shared.clone();
        self.tick = Some(tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + CONTROL_PERIOD, CONTROL_PERIOD);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if !shared.update() {
                    break;
                }
            }
        }));
    }

    fn detach(&mut self) {
        if let Some(handle) = self.tick.take() {
            debug!(wheel = %self.id(), "Detaching control tick");
            handle.abort();
        }
        self.shared.lock().tick_attached = false;
    }
}

impl Drop for Wheel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::{EventLog, SimOutput, SimPwm};
    use crate::motor::tacho::{Direction, TachSample};
    use std::time::Duration;

    struct Rig {
        wheel: Wheel,
        pwm: SimPwm,
        brake: SimOutput,
        tach: Arc<TachCell>,
    }

    fn rig(loop_mode: LoopMode) -> Rig {
        let log = EventLog::new();
        let pwm = SimPwm::new("drive", &log);
        let brake = SimOutput::new("brake", &log);
        let tach = Arc::new(TachCell::new());
        let actuator = WheelActuator::new(Box::new(pwm.clone()), Box::new(brake.clone()));
        let wheel = Wheel::new(WheelId::A, actuator, tach.clone(), loop_mode);
        Rig {
            wheel,
            pwm,
            brake,
            tach,
        }
    }

    async fn ticks(n: u32) {
        for _ in 0..n {
            tokio::time::sleep(CONTROL_PERIOD).await;
        }
    }

    #[test]
    fn test_headstart_uses_integer_division() {
        assert_eq!(rotation_headstart(0), 0.0);
        assert_eq!(rotation_headstart(49), 0.0);
        assert_eq!(rotation_headstart(50), 1.0);
        assert_eq!(rotation_headstart(-149), -2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_wheel_is_braked() {
        let r = rig(LoopMode::ClosedLoop);
        assert_eq!(r.wheel.mode(), WheelMode::Braked);
        assert!(!r.wheel.is_attached());
        assert!(!r.brake.is_high());
        assert_eq!(r.pwm.duty(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_loop_attaches_and_drives() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.wheel.drive_closed_loop(30.0, 0);
        assert_eq!(r.wheel.mode(), WheelMode::ClosedLoopPid);
        assert!(r.wheel.is_attached());
        assert!(r.brake.is_high());

        ticks(5).await;
        assert!(r.pwm.duty() > 0.5, "duty {}", r.pwm.duty());
        let t = r.wheel.telemetry();
        assert_eq!(t.set_point, 30.0);
        assert!(t.pid_output > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_sets_point_and_headstart() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.wheel.drive_closed_loop(10.0, 250);
        assert_eq!(r.wheel.telemetry().set_point, 15.0);

        ticks(2).await;
        let t = r.wheel.telemetry();
        assert!((t.drive_percent - (t.pid_output + 5.0)).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pure_rotation_keeps_wheel_live() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.wheel.drive_closed_loop(0.0, 100);
        assert_eq!(r.wheel.mode(), WheelMode::ClosedLoopPid);
        ticks(3).await;
        assert!(r.wheel.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_measured_speed_feeds_pid() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.tach.store(TachSample::new(6875, Direction::Reverse));
        r.wheel.drive_closed_loop(20.0, 0);
        ticks(2).await;
        let t = r.wheel.telemetry();
        assert!((t.current_speed + 1.0).abs() < 1e-3);
        // going backwards while asked forwards: push hard forwards
        assert!(t.pid_output > 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_goal_brakes_immediately() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.wheel.drive_closed_loop(40.0, 0);
        ticks(3).await;
        r.wheel.drive_closed_loop(0.0, 0);
        assert_eq!(r.wheel.mode(), WheelMode::Braked);
        assert!(!r.wheel.is_attached());
        assert!(!r.brake.is_high());
        assert_eq!(r.pwm.duty(), 0.5);
        assert_eq!(r.wheel.telemetry().set_point, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_twice_leaves_tick_detached() {
        let mut r = rig(LoopMode::ClosedLoop);
        for _ in 0..2 {
            r.wheel.drive_closed_loop(25.0, 0);
            assert!(r.wheel.is_attached());
            ticks(2).await;

            r.wheel.stop();
            assert!(!r.wheel.is_attached());
            assert_eq!(r.wheel.mode(), WheelMode::Braked);

            // nothing left running that could touch the output
            ticks(5).await;
            assert_eq!(r.pwm.duty(), 0.5);
            assert!(!r.brake.is_high());
        }
        r.wheel.stop();
        assert!(!r.wheel.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tick_after_stop_is_noop() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.wheel.drive_closed_loop(60.0, 0);
        ticks(2).await;
        let shared = r.wheel.shared.clone();
        r.wheel.stop();

        assert!(!shared.update());
        assert_eq!(r.pwm.duty(), 0.5);
        assert!(!r.brake.is_high());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_brakes_when_goal_cleared() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.wheel.drive_closed_loop(20.0, 0);
        {
            let mut c = r.wheel.shared.lock();
            c.goal_speed = 0.0;
            c.rotation = 0;
        }
        ticks(2).await;
        assert_eq!(r.wheel.mode(), WheelMode::Braked);
        assert!(!r.wheel.is_attached());
        assert!(!r.brake.is_high());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_agrees_with_wheel_on_attach_state() {
        let mut r = rig(LoopMode::ClosedLoop);
        let probe = r.wheel.probe();
        let agree = |wheel: &Wheel| {
            let attached = wheel.is_attached();
            assert_eq!(probe.telemetry().tick_attached, attached);
            assert_eq!(wheel.telemetry().tick_attached, attached);
            attached
        };
        assert!(!agree(&r.wheel));

        r.wheel.drive_closed_loop(20.0, 0);
        assert!(agree(&r.wheel));
        ticks(2).await;
        assert!(agree(&r.wheel));

        r.wheel.stop();
        assert!(!agree(&r.wheel));

        // tick brakes the wheel by itself
        r.wheel.drive_closed_loop(20.0, 0);
        {
            let mut c = r.wheel.shared.lock();
            c.goal_speed = 0.0;
            c.rotation = 0;
        }
        ticks(2).await;
        assert_eq!(r.wheel.mode(), WheelMode::Braked);
        assert!(!agree(&r.wheel));

        // and can be attached again afterwards
        r.wheel.drive_closed_loop(-15.0, 0);
        assert!(agree(&r.wheel));
        r.wheel.drive_open_loop(40.0);
        assert!(!agree(&r.wheel));
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_clamped_for_large_goal() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.wheel.drive_closed_loop(150.0, 0);
        for _ in 0..1000 {
            ticks(1).await;
            let t = r.wheel.telemetry();
            assert!((-100.0..=100.0).contains(&t.pid_output));
            assert!((0.0..=1.0).contains(&r.pwm.duty()));
        }
        assert_eq!(r.wheel.telemetry().pid_output, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_loop_passthrough() {
        let mut r = rig(LoopMode::OpenLoop);
        r.wheel.drive(30.0, 20);
        assert_eq!(r.wheel.mode(), WheelMode::OpenLoop);
        assert!(!r.wheel.is_attached());
        assert!(r.brake.is_high());
        assert_eq!(r.pwm.duty(), 0.75);

        r.wheel.drive(0.0, 0);
        assert_eq!(r.wheel.mode(), WheelMode::Braked);
        assert_eq!(r.pwm.duty(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_loop_cancels_pid_tick() {
        let mut r = rig(LoopMode::ClosedLoop);
        r.wheel.drive_closed_loop(30.0, 0);
        r.wheel.drive_open_loop(-50.0);
        assert!(!r.wheel.is_attached());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(r.pwm.duty(), 0.25);
    }
}
