// Tachometer edge capture
//
// Each rising edge on a wheel's tacho input records the time since the
// previous edge and the level of the paired direction (hall) input. The
// sample is packed into one AtomicU64 so the control tick always reads a
// delta and a direction that came from the same edge.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;
use tracing::trace;

use crate::config::METERS_PER_PULSE;
use crate::hw::InputPin;

const DIRECTION_BIT: u64 = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

/// One captured edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TachSample {
    /// Microseconds since the previous edge, 0 until the first edge
    pub delta_us: u32,
    pub direction: Direction,
}

impl TachSample {
    pub fn new(delta_us: u32, direction: Direction) -> Self {
        Self { delta_us, direction }
    }

    /// Wheel surface speed in m/s, negative when reversing.
    /// A sample with no elapsed time (no edge seen yet) reads as standstill.
    pub fn speed_mps(&self) -> f32 {
        if self.delta_us == 0 {
            return 0.0;
        }
        let speed = METERS_PER_PULSE / (self.delta_us as f32 / 1_000_000.0);
        match self.direction {
            Direction::Forward => speed,
            Direction::Reverse => -speed,
        }
    }

    fn pack(self) -> u64 {
        let dir = match self.direction {
            Direction::Forward => 0,
            Direction::Reverse => DIRECTION_BIT,
        };
        self.delta_us as u64 | dir
    }

    fn unpack(raw: u64) -> Self {
        Self {
            delta_us: raw as u32,
            direction: if raw & DIRECTION_BIT != 0 {
                Direction::Reverse
            } else {
                Direction::Forward
            },
        }
    }
}

/// Single-writer / single-reader cell holding the latest sample
#[derive(Debug, Default)]
pub struct TachCell(AtomicU64);

impl TachCell {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn store(&self, sample: TachSample) {
        self.0.store(sample.pack(), Ordering::Release);
    }

    pub fn load(&self) -> TachSample {
        TachSample::unpack(self.0.load(Ordering::Acquire))
    }
}

/// Edge handler for one wheel. Touches nothing but its own cell.
pub struct TachCapture {
    cell: Arc<TachCell>,
    direction_pin: Box<dyn InputPin>,
    last_edge: Instant,
}

impl TachCapture {
    pub fn new(cell: Arc<TachCell>, direction_pin: Box<dyn InputPin>) -> Self {
        Self {
            cell,
            direction_pin,
            last_edge: Instant::now(),
        }
    }

    /// Rising edge on the tacho input
    pub fn on_rising_edge(&mut self) {
        // hall high means the wheel is turning backwards
        let direction = if self.direction_pin.is_high() {
            Direction::Reverse
        } else {
            Direction::Forward
        };
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_edge).as_micros();
        self.last_edge = now;

        let sample = TachSample::new(elapsed.min(u32::MAX as u128) as u32, direction);
        trace!("Tacho edge: {:?}", sample);
        self.cell.store(sample);
    }
}
