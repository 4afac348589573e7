// Robot main loop with watchdog
//
// Each iteration drains the radio link, dispatches valid frames and kicks the
// watchdog. Nothing in the loop blocks: if it ever stalls the watchdog resets
// the unit, which is the only global recovery path.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, trace, warn};

use crate::config::{
    DEFAULT_FREQUENCY, DEFAULT_ROBOT_ID, DIAGNOSTIC_INTERVAL, FRAME_SIZE, KEY_FREQUENCY, KEY_ID,
    POLL_INTERVAL, SECTION_NRF, SECTION_ROBOT, WATCHDOG_TIMEOUT, frequency_for_channel,
    is_allowed_frequency,
};
use crate::hw::PwmPin;
use crate::hw::sim::{EventLog, SimPwm, sim_wheel, spawn_plant};
use crate::kicker::{Kicker, spawn_kicker};
use crate::link::{LinkError, RadioLink, ZenohLink};
use crate::messages::{WheelId, WheelTelemetry};
use crate::motor::{LoopMode, OmniDriver, WheelProbe};
use crate::protocol::{self, ConfigPacket, DrivePacket, FrameError, Packet};
use crate::store::{ConfigStore, JsonFileStore};
use crate::watchdog::{SoftWatchdog, Watchdog};

/// Frame counters since boot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub received: u64,
    pub dispatched: u64,
    pub checksum_failures: u64,
    pub foreign_robot: u64,
    pub malformed: u64,
    pub config_rejected: u64,
    /// Failed reads from the link itself
    pub link_errors: u64,
    /// Link errors that were logged at warn
    pub link_warnings: u64,
}

/// What happened to one received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Drove,
    Reconfigured(u16),
    ConfigRejected(u16),
    ChecksumFailed,
    ForeignRobot(u8),
    Malformed,
}

pub struct Runtime<L: RadioLink> {
    robot_id: u8,
    link: L,
    store: Box<dyn ConfigStore>,
    driver: OmniDriver,
    kicker: Kicker,
    dribbler: Box<dyn PwmPin>,
    driving: Arc<AtomicBool>,
    stats: LinkStats,
    /// Last link error, until the link reads cleanly again
    link_fault: Option<String>,
}

impl<L: RadioLink> Runtime<L> {
    pub fn new(
        robot_id: u8,
        link: L,
        store: Box<dyn ConfigStore>,
        driver: OmniDriver,
        kicker: Kicker,
        mut dribbler: Box<dyn PwmPin>,
    ) -> Self {
        dribbler.set_duty(0.0);
        Self {
            robot_id,
            link,
            store,
            driver,
            kicker,
            dribbler,
            driving: Arc::new(AtomicBool::new(false)),
            stats: LinkStats::default(),
            link_fault: None,
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn driver(&self) -> &OmniDriver {
        &self.driver
    }

    /// Set while the last drive frame had both speeds non-zero
    pub fn driving_flag(&self) -> Arc<AtomicBool> {
        self.driving.clone()
    }

    /// Validate and dispatch one frame
    pub fn handle_frame(&mut self, bytes: &[u8]) -> Outcome {
        self.stats.received += 1;

        let packet = match protocol::decode(bytes) {
            Ok(packet) => packet,
            Err(FrameError::ChecksumMismatch { received, computed }) => {
                self.stats.checksum_failures += 1;
                debug!(
                    "Checksum failed (frame 0x{:02X}, computed 0x{:02X}), {} failures so far",
                    received, computed, self.stats.checksum_failures
                );
                return Outcome::ChecksumFailed;
            }
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Dropping frame: {}", e);
                return Outcome::Malformed;
            }
        };

        let robot_id = packet.robot_id();
        if robot_id != self.robot_id {
            self.stats.foreign_robot += 1;
            debug!("Frame for robot {} ignored", robot_id);
            return Outcome::ForeignRobot(robot_id);
        }

        self.stats.dispatched += 1;
        match packet {
            Packet::Drive(drive) => {
                self.on_drive(&drive);
                Outcome::Drove
            }
            Packet::Config(config) => self.on_config(&config),
        }
    }

    fn on_drive(&mut self, packet: &DrivePacket) {
        debug!(
            direction = packet.direction,
            speed = packet.direction_speed,
            rotation = packet.rotation_speed,
            kick = packet.kicker_speed,
            dribble = packet.dribble_speed,
            "Drive frame"
        );
        let driving = packet.direction_speed != 0 && packet.rotation_speed != 0;
        self.driving.store(driving, Ordering::Relaxed);

        self.driver.drive(&packet.command());

        match packet.dribble_speed {
            0 => self.dribbler.set_duty(0.0),
            1 => self.dribbler.set_duty(1.0),
            other => trace!("Dribble value {} leaves dribbler as is", other),
        }

        if packet.kicker_speed != 0 {
            self.kicker.signal(packet.kicker_speed);
        }
    }

    fn on_config(&mut self, packet: &ConfigPacket) -> Outcome {
        let mhz = packet.channel_freq;
        if !is_allowed_frequency(mhz) {
            self.stats.config_rejected += 1;
            warn!(
                "Unsupported frequency {} MHz, staying on {} MHz",
                mhz,
                self.link.frequency()
            );
            return Outcome::ConfigRejected(mhz);
        }

        if let Err(e) = self.store.write(SECTION_NRF, KEY_FREQUENCY, &mhz.to_string()) {
            warn!("Failed to persist frequency {} MHz: {}", mhz, e);
        }
        match self.link.set_frequency(mhz) {
            Ok(()) => info!("Radio frequency changed to {} MHz", mhz),
            Err(e) => warn!("Failed to retune radio to {} MHz: {}", mhz, e),
        }
        Outcome::Reconfigured(mhz)
    }

    /// Handle every frame waiting on the link. Returns how many were taken.
    pub fn poll(&mut self) -> usize {
        let mut taken = 0;
        loop {
            let received = self.link.try_recv();
            if !matches!(received, Err(LinkError::Zenoh(_))) {
                self.clear_link_fault();
            }
            match received {
                Ok(Some(frame)) => {
                    taken += 1;
                    self.handle_frame(&frame);
                }
                Ok(None) => break,
                Err(LinkError::BadLength(len)) => {
                    taken += 1;
                    self.stats.received += 1;
                    self.stats.malformed += 1;
                    debug!("Dropping {} byte frame, expected {}", len, FRAME_SIZE);
                }
                Err(e) => {
                    self.record_link_fault(e);
                    break;
                }
            }
        }
        taken
    }

    /// Warn once per distinct error; repeats only show at trace level
    fn record_link_fault(&mut self, e: LinkError) {
        self.stats.link_errors += 1;
        let message = e.to_string();
        if self.link_fault.as_deref() == Some(message.as_str()) {
            trace!("Radio link error repeated: {}", message);
            return;
        }
        self.stats.link_warnings += 1;
        warn!("Radio link error: {}", message);
        self.link_fault = Some(message);
    }

    fn clear_link_fault(&mut self) {
        if let Some(fault) = self.link_fault.take() {
            info!(
                "Radio link recovered from \"{}\" after {} errors",
                fault, self.stats.link_errors
            );
        }
    }

    /// Brake every wheel and release the dribbler
    pub fn stop(&mut self) {
        self.driving.store(false, Ordering::Relaxed);
        self.driver.stop();
        self.dribbler.set_duty(0.0);
    }

    /// Main loop. Never returns; a stall is caught by the watchdog.
    pub async fn run<W: Watchdog>(&mut self, watchdog: &mut W, timeout: Duration) {
        watchdog.arm(timeout);
        let mut tick = interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Main loop started: robot {} on {} MHz, {}ms watchdog timeout",
            self.robot_id,
            self.link.frequency(),
            timeout.as_millis()
        );

        loop {
            tick.tick().await;
            self.poll();
            watchdog.kick();
        }
    }
}

/// Radio frequency to boot on: the stored one if it is whitelisted
pub fn boot_frequency(store: &dyn ConfigStore) -> u16 {
    let Some(value) = store.read(SECTION_NRF, KEY_FREQUENCY) else {
        info!("No stored frequency, using {} MHz", DEFAULT_FREQUENCY);
        return DEFAULT_FREQUENCY;
    };
    match value.trim().parse::<u16>() {
        Ok(mhz) if is_allowed_frequency(mhz) => mhz,
        _ => {
            warn!(
                "Stored frequency {:?} is not usable, using {} MHz",
                value, DEFAULT_FREQUENCY
            );
            DEFAULT_FREQUENCY
        }
    }
}

/// Robot id: command line first, then the store, then the default
pub fn boot_robot_id(store: &dyn ConfigStore, cli: Option<u8>) -> u8 {
    if let Some(id) = cli {
        return id;
    }
    match store.read(SECTION_ROBOT, KEY_ID).map(|v| v.trim().parse::<u8>()) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            warn!("Stored robot id is invalid ({}), using {}", e, DEFAULT_ROBOT_ID);
            DEFAULT_ROBOT_ID
        }
        None => DEFAULT_ROBOT_ID,
    }
}

/// Every wheel's telemetry as one JSON array, or nothing while not driving
pub fn wheel_report(probes: &[WheelProbe; 3], driving: &AtomicBool) -> Option<String> {
    if !driving.load(Ordering::Relaxed) {
        return None;
    }
    let telemetry: Vec<WheelTelemetry> = probes.iter().map(WheelProbe::telemetry).collect();
    match serde_json::to_string(&telemetry) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to encode wheel telemetry: {}", e);
            None
        }
    }
}

/// Log the wheel report once per DIAGNOSTIC_INTERVAL while driving
pub fn spawn_diagnostics(probes: [WheelProbe; 3], driving: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(DIAGNOSTIC_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if let Some(report) = wheel_report(&probes, &driving) {
                info!(wheels = %report, "Wheel state");
            }
        }
    })
}

/// Startup options for the robot process
#[derive(Debug, Clone)]
pub struct Settings {
    /// Overrides `[robot] id` from the store
    pub robot_id: Option<u8>,
    /// Channel switch position; overrides the stored frequency
    pub channel: Option<u8>,
    pub store_path: PathBuf,
    pub loop_mode: LoopMode,
    pub watchdog_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            robot_id: None,
            channel: None,
            store_path: PathBuf::from(crate::config::DEFAULT_STORE_PATH),
            loop_mode: LoopMode::ClosedLoop,
            watchdog_timeout: WATCHDOG_TIMEOUT,
        }
    }
}

/// Boot the robot on simulated hardware with a zenoh radio link and run
/// until ctrl-c
pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = JsonFileStore::open(&settings.store_path)?;
    let frequency = match settings.channel {
        Some(channel) => frequency_for_channel(channel),
        None => boot_frequency(&store),
    };
    let robot_id = boot_robot_id(&store, settings.robot_id);

    let link = ZenohLink::open(frequency).await?;

    let log = EventLog::disabled();
    let mut plants = Vec::with_capacity(WheelId::ALL.len());
    let mut build = |id| {
        let (wheel, pins, capture) = sim_wheel(id, settings.loop_mode, &log);
        plants.push(spawn_plant(id, pins, capture));
        wheel
    };
    let driver = OmniDriver::new(build(WheelId::A), build(WheelId::B), build(WheelId::C));

    let (kicker, kicker_task) = spawn_kicker(
        Box::new(SimPwm::new("kicker", &log)),
        Box::new(SimPwm::new("chipper", &log)),
    );
    let dribbler = Box::new(SimPwm::new("dribbler", &log));

    let mut runtime = Runtime::new(
        robot_id,
        link,
        Box::new(store),
        driver,
        kicker,
        dribbler,
    );
    let diagnostics = spawn_diagnostics(runtime.driver().probes(), runtime.driving_flag());

    info!(
        robot_id,
        frequency,
        frame_size = FRAME_SIZE,
        loop_mode = ?settings.loop_mode,
        "Robot booted"
    );

    // Resetting the unit is left to the process supervisor
    let mut watchdog = SoftWatchdog::new(Arc::new(|| {
        error!("Main loop stalled, exiting for restart");
        std::process::exit(1);
    }));

    tokio::select! {
        _ = runtime.run(&mut watchdog, settings.watchdog_timeout) => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down");
        }
    }

    runtime.stop();
    diagnostics.abort();
    kicker_task.abort();
    for plant in plants {
        plant.abort();
    }
    info!("Link stats: {:?}", runtime.stats());
    Ok(())
}
