// Radio link: fixed-size frames in, channel selection
//
// The robot only receives. Frames arrive in order or not at all; there is no
// retry and no acknowledgement.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};
use zenoh::Wait;
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;

use crate::config::{FRAME_SIZE, radio_key};
use crate::protocol::RawFrame;

/// Error types for the radio link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Zenoh error: {0}")]
    Zenoh(String),

    #[error("Frame has {0} bytes, expected {FRAME_SIZE}")]
    BadLength(usize),
}

pub type Result<T> = std::result::Result<T, LinkError>;

pub trait RadioLink: Send {
    /// Next received frame, without blocking
    fn try_recv(&mut self) -> Result<Option<RawFrame>>;

    /// Retune to another channel frequency (MHz)
    fn set_frequency(&mut self, mhz: u16) -> Result<()>;

    fn frequency(&self) -> u16;
}

fn to_frame(bytes: &[u8]) -> Result<RawFrame> {
    RawFrame::try_from(bytes).map_err(|_| LinkError::BadLength(bytes.len()))
}

/// Radio channel carried over zenoh: one key expression per frequency
pub struct ZenohLink {
    session: zenoh::Session,
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
    frequency: u16,
}

impl ZenohLink {
    pub async fn open(frequency: u16) -> Result<Self> {
        info!("Opening Zenoh session...");
        let session = zenoh::open(zenoh::Config::default())
            .await
            .map_err(|e| LinkError::Zenoh(e.to_string()))?;
        let key = radio_key(frequency);
        let subscriber = session
            .declare_subscriber(key.clone())
            .await
            .map_err(|e| LinkError::Zenoh(e.to_string()))?;
        info!("Listening on {}", key);

        Ok(Self {
            session,
            subscriber,
            frequency,
        })
    }
}

impl RadioLink for ZenohLink {
    fn try_recv(&mut self) -> Result<Option<RawFrame>> {
        match self.subscriber.try_recv() {
            Ok(Some(sample)) => {
                let payload = sample.payload().to_bytes();
                to_frame(&payload).map(Some)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LinkError::Zenoh(e.to_string())),
        }
    }

    fn set_frequency(&mut self, mhz: u16) -> Result<()> {
        let key = radio_key(mhz);
        let subscriber = self
            .session
            .declare_subscriber(key.clone())
            .wait()
            .map_err(|e| LinkError::Zenoh(e.to_string()))?;
        // dropping the old subscriber undeclares it
        self.subscriber = subscriber;
        self.frequency = mhz;
        info!("Radio retuned to {} MHz ({})", mhz, key);
        Ok(())
    }

    fn frequency(&self) -> u16 {
        self.frequency
    }
}

/// In-process link. Clones share the queue and the frequency, so a test can
/// keep one end after handing the other to the runtime.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    frequency: Arc<AtomicU16>,
}

impl MemoryLink {
    pub fn new(frequency: u16) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            frequency: Arc::new(AtomicU16::new(frequency)),
        }
    }

    pub fn push(&self, bytes: &[u8]) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(bytes.to_vec());
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl RadioLink for MemoryLink {
    fn try_recv(&mut self) -> Result<Option<RawFrame>> {
        let next = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.map(|bytes| to_frame(&bytes)).transpose()
    }

    fn set_frequency(&mut self, mhz: u16) -> Result<()> {
        debug!("Memory link retuned to {} MHz", mhz);
        self.frequency.store(mhz, Ordering::Release);
        Ok(())
    }

    fn frequency(&self) -> u16 {
        self.frequency.load(Ordering::Acquire)
    }
}
