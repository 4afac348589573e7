// Simulated pins and motor plant
//
// Pins share their state through Arc so a clone can be kept as a probe while
// the pin itself is boxed into a wheel. Every write can be recorded in an
// EventLog to check the order of brake and duty changes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use super::{InputPin, OutputPin, PwmPin};
use crate::config::{
    CONTROL_PERIOD, DUTY_CENTER, DUTY_PER_PERCENT, MAX_WHEEL_SPEED_MPS, METERS_PER_PULSE,
    PID_LIMIT,
};
use crate::messages::WheelId;
use crate::motor::{LoopMode, TachCapture, TachCell, Wheel, WheelActuator};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HwEvent {
    Duty { pin: &'static str, duty: f32 },
    Level { pin: &'static str, high: bool },
}

/// Ordered record of pin writes. A disabled log drops every event, for long
/// runs where nobody reads it.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<HwEvent>>>,
    recording: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::default(),
            recording: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            events: Arc::default(),
            recording: false,
        }
    }

    fn push(&self, event: HwEvent) {
        if self.recording {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct SimPwm {
    name: &'static str,
    duty: Arc<AtomicU32>,
    log: EventLog,
}

impl SimPwm {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            duty: Arc::new(AtomicU32::new(0.0f32.to_bits())),
            log: log.clone(),
        }
    }

    pub fn duty(&self) -> f32 {
        f32::from_bits(self.duty.load(Ordering::Acquire))
    }
}

impl PwmPin for SimPwm {
    fn set_duty(&mut self, duty: f32) {
        self.duty.store(duty.to_bits(), Ordering::Release);
        self.log.push(HwEvent::Duty {
            pin: self.name,
            duty,
        });
    }

    fn duty(&self) -> f32 {
        SimPwm::duty(self)
    }
}

#[derive(Debug, Clone)]
pub struct SimOutput {
    name: &'static str,
    level: Arc<AtomicBool>,
    log: EventLog,
}

impl SimOutput {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            level: Arc::new(AtomicBool::new(false)),
            log: log.clone(),
        }
    }

    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    fn write(&mut self, high: bool) {
        self.level.store(high, Ordering::Release);
        self.log.push(HwEvent::Level {
            pin: self.name,
            high,
        });
    }
}

impl OutputPin for SimOutput {
    fn set_high(&mut self) {
        self.write(true);
    }

    fn set_low(&mut self) {
        self.write(false);
    }

    fn is_set_high(&self) -> bool {
        self.is_high()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimInput(Arc<AtomicBool>);

impl SimInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, high: bool) {
        self.0.store(high, Ordering::Release);
    }
}

impl InputPin for SimInput {
    fn is_high(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Pins of one simulated wheel
#[derive(Debug, Clone)]
pub struct SimWheelPins {
    pub drive: SimPwm,
    pub brake: SimOutput,
    pub hall: SimInput,
}

impl SimWheelPins {
    pub fn new(id: WheelId, log: &EventLog) -> Self {
        let (drive, brake) = match id {
            WheelId::A => ("drive_a", "brake_a"),
            WheelId::B => ("drive_b", "brake_b"),
            WheelId::C => ("drive_c", "brake_c"),
        };
        Self {
            drive: SimPwm::new(drive, log),
            brake: SimOutput::new(brake, log),
            hall: SimInput::new(),
        }
    }
}

/// Build a wheel on simulated pins, returning the pins and its edge handler
pub fn sim_wheel(
    id: WheelId,
    loop_mode: LoopMode,
    log: &EventLog,
) -> (Wheel, SimWheelPins, TachCapture) {
    let pins = SimWheelPins::new(id, log);
    let cell = Arc::new(TachCell::new());
    let capture = TachCapture::new(cell.clone(), Box::new(pins.hall.clone()));
    let actuator = WheelActuator::new(Box::new(pins.drive.clone()), Box::new(pins.brake.clone()));
    let wheel = Wheel::new(id, actuator, cell, loop_mode);
    (wheel, pins, capture)
}

/// First-order motor model: the wheel speed follows the applied duty, the
/// brake stops it, and every METERS_PER_PULSE travelled fires a tacho edge.
pub fn spawn_plant(id: WheelId, pins: SimWheelPins, mut capture: TachCapture) -> JoinHandle<()> {
    // fraction of the remaining speed error closed per step
    const RESPONSE: f32 = 0.05;

    tokio::spawn(async move {
        debug!(wheel = %id, "Simulated motor plant running");
        let dt = CONTROL_PERIOD.as_secs_f32();
        let mut tick = interval(CONTROL_PERIOD);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut speed = 0.0f32;
        let mut travelled = 0.0f32;

        loop {
            tick.tick().await;
            if !pins.brake.is_high() {
                speed = 0.0;
                continue;
            }
            let percent = ((pins.drive.duty() - DUTY_CENTER) / DUTY_PER_PERCENT)
                .clamp(-PID_LIMIT, PID_LIMIT);
            let target = percent / PID_LIMIT * MAX_WHEEL_SPEED_MPS;
            speed += (target - speed) * RESPONSE;

            travelled += speed.abs() * dt;
            while travelled >= METERS_PER_PULSE {
                travelled -= METERS_PER_PULSE;
                pins.hall.set(speed < 0.0);
                capture.on_rising_edge();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pwm_probe_shares_state() {
        let log = EventLog::new();
        let probe = SimPwm::new("p", &log);
        let mut boxed: Box<dyn PwmPin> = Box::new(probe.clone());
        boxed.set_duty(0.25);
        assert_eq!(probe.duty(), 0.25);
        assert_eq!(
            log.events(),
            vec![HwEvent::Duty {
                pin: "p",
                duty: 0.25
            }]
        );
    }

    #[test]
    fn test_disabled_log_records_nothing() {
        let log = EventLog::disabled();
        let mut pwm = SimPwm::new("p", &log);
        pwm.set_duty(0.7);
        assert_eq!(pwm.duty(), 0.7);
        assert!(log.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plant_closes_the_loop() {
        let log = EventLog::new();
        let (mut wheel, pins, capture) = sim_wheel(WheelId::C, LoopMode::ClosedLoop, &log);
        let plant = spawn_plant(WheelId::C, pins, capture);

        // 1 m/s in wheel-percent units
        wheel.drive_closed_loop(20.0, 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let speed = wheel.telemetry().current_speed;
        assert!(speed > 0.5, "speed {}", speed);

        wheel.drive_closed_loop(-20.0, 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let speed = wheel.telemetry().current_speed;
        assert!(speed < -0.5, "speed {}", speed);

        plant.abort();
    }
}
