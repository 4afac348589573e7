// Keyboard teleop: WASD move, Z/X rotate, R/F speed, SPACE kick, C chip,
// B dribbler, Q quit
//
// Stands in for the base station: builds checksummed drive frames and puts
// them on the radio channel key.
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use omnibot_runtime::config::{DEFAULT_FREQUENCY, DEFAULT_ROBOT_ID, is_allowed_frequency, radio_key};
use omnibot_runtime::protocol::{ConfigPacket, DrivePacket, MSG_DRIVE};

const SPEEDS: [f64; 3] = [300.0, 700.0, 1500.0]; // mm/s
const ROTATION_SPEEDS: [i16; 3] = [50, 150, 300]; // mm/s at the wheel
const KICK_POWER: i8 = 80;
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input

#[derive(Parser, Debug)]
#[command(about = "Drive an omnibot from the keyboard")]
struct Cli {
    /// Robot to address
    #[arg(long, default_value_t = DEFAULT_ROBOT_ID)]
    robot_id: u8,

    /// Channel the robot is listening on (MHz)
    #[arg(long, default_value_t = DEFAULT_FREQUENCY)]
    frequency: u16,

    /// Move the robot to another channel before driving
    #[arg(long)]
    set_frequency: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let mut frequency = cli.frequency;

    if let Some(target) = cli.set_frequency {
        if !is_allowed_frequency(target) {
            return Err(format!("{} MHz is not an allowed frequency", target).into());
        }
        let frame = ConfigPacket {
            robot_id: cli.robot_id,
            channel_freq: target,
        }
        .encode();
        session.put(radio_key(frequency), frame.to_vec()).await?;
        info!("Asked robot {} to move to {} MHz", cli.robot_id, target);
        frequency = target;
        // give the robot time to retune before the first drive frame
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let key = radio_key(frequency);
    let publisher = session.declare_publisher(key.clone()).await?;
    info!("Publishing to {} for robot {}", key, cli.robot_id);
    info!("Controls: WASD=move, Z/X=rotate, R/F=speed, SPACE=kick, C=chip, B=dribbler, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher, cli.robot_id).await;
    disable_raw_mode()?;

    result
}

/// Robot-frame velocity (forward, left) in mm/s to heading in degrees and
/// speed in mm/s
fn heading_and_speed(x_vel: f64, y_vel: f64) -> (i16, i16) {
    let speed = x_vel.hypot(y_vel);
    if speed == 0.0 {
        return (0, 0);
    }
    let heading = y_vel.atan2(x_vel).to_degrees().round() as i16;
    (heading, speed.round().min(i16::MAX as f64) as i16)
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
    robot_id: u8,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Persistent velocity state
    let mut x_vel = 0.0;
    let mut y_vel = 0.0;
    let mut rotation: i16 = 0;
    let mut dribble = false;
    let mut last_movement_input = Instant::now();

    loop {
        // one-shot, cleared after the next frame
        let mut kick: i8 = 0;

        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        x_vel = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        x_vel = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        y_vel = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        y_vel = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Rotation
                    KeyCode::Char('z') if pressed => {
                        rotation = ROTATION_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') if pressed => {
                        rotation = -ROTATION_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Ball handling
                    KeyCode::Char(' ') if kind == KeyEventKind::Press => kick = KICK_POWER,
                    KeyCode::Char('c') if kind == KeyEventKind::Press => kick = -KICK_POWER,
                    KeyCode::Char('b') if kind == KeyEventKind::Press => {
                        dribble = !dribble;
                        info!("Dribbler: {}", if dribble { "ON" } else { "OFF" });
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            x_vel = 0.0;
            y_vel = 0.0;
            rotation = 0;
        }

        // Always publish at ~50Hz
        let (direction, direction_speed) = heading_and_speed(x_vel, y_vel);
        let frame = DrivePacket {
            message_type: MSG_DRIVE,
            robot_id,
            direction,
            direction_speed,
            rotation_speed: rotation,
            kicker_speed: kick,
            dribble_speed: u8::from(dribble),
        }
        .encode();
        if let Err(e) = publisher.put(frame.to_vec()).await {
            warn!("Failed to publish frame: {}", e);
        }
    }

    // leave the robot braked
    let stop = DrivePacket {
        message_type: MSG_DRIVE,
        robot_id,
        direction: 0,
        direction_speed: 0,
        rotation_speed: 0,
        kicker_speed: 0,
        dribble_speed: 0,
    }
    .encode();
    publisher.put(stop.to_vec()).await?;

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_and_speed() {
        assert_eq!(heading_and_speed(0.0, 0.0), (0, 0));
        assert_eq!(heading_and_speed(300.0, 0.0), (0, 300));
        assert_eq!(heading_and_speed(0.0, 700.0), (90, 700));
        assert_eq!(heading_and_speed(-1500.0, 0.0), (180, 1500));
        assert_eq!(heading_and_speed(300.0, -300.0), (-45, 424));
    }
}
