// Liveness watchdog
//
// The main loop kicks the watchdog every iteration. If kicks stop for longer
// than the armed timeout the unit is reset; there is no partial recovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error};

pub trait Watchdog: Send {
    /// (Re)arm with a timeout; the countdown starts now
    fn arm(&mut self, timeout: Duration);
    /// Restart the countdown
    fn kick(&mut self);
}

/// Action taken when the watchdog expires
pub type ResetHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Countdown {
    timeout: Duration,
    deadline: Option<Instant>,
    /// A monitor task is waiting on the deadline
    monitored: bool,
}

/// Watchdog driven by a tokio timer task
pub struct SoftWatchdog {
    countdown: Arc<Mutex<Countdown>>,
    expired: Arc<AtomicBool>,
    on_expire: ResetHandler,
    monitor: Option<JoinHandle<()>>,
}

impl SoftWatchdog {
    pub fn new(on_expire: ResetHandler) -> Self {
        Self {
            countdown: Arc::new(Mutex::new(Countdown::default())),
            expired: Arc::new(AtomicBool::new(false)),
            on_expire,
            monitor: None,
        }
    }

    pub fn has_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    fn spawn_monitor(&mut self) {
        let countdown = self.countdown.clone();
        let expired = self.expired.clone();
        let on_expire = self.on_expire.clone();

        self.monitor = Some(tokio::spawn(async move {
            loop {
                let deadline = {
                    let mut c = countdown.lock().unwrap_or_else(PoisonError::into_inner);
                    match c.deadline {
                        Some(deadline) => deadline,
                        None => {
                            c.monitored = false;
                            return;
                        }
                    }
                };
                sleep_until(deadline).await;

                {
                    let mut c = countdown.lock().unwrap_or_else(PoisonError::into_inner);
                    // a kick may have moved the deadline while we slept
                    if !c.deadline.is_some_and(|d| Instant::now() >= d) {
                        continue;
                    }
                    // kicks do nothing until the next arm
                    c.deadline = None;
                    c.monitored = false;
                }
                error!("Watchdog expired, resetting unit");
                expired.store(true, Ordering::Release);
                on_expire();
                return;
            }
        }));
    }
}

impl Watchdog for SoftWatchdog {
    fn arm(&mut self, timeout: Duration) {
        debug!("Watchdog armed with {}ms timeout", timeout.as_millis());
        let spawn = {
            let mut c = self.countdown.lock().unwrap_or_else(PoisonError::into_inner);
            c.timeout = timeout;
            c.deadline = Some(Instant::now() + timeout);
            !std::mem::replace(&mut c.monitored, true)
        };
        self.expired.store(false, Ordering::Release);
        if spawn {
            self.spawn_monitor();
        }
    }

    fn kick(&mut self) {
        let mut c = self.countdown.lock().unwrap_or_else(PoisonError::into_inner);
        if c.deadline.is_some() {
            c.deadline = Some(Instant::now() + c.timeout);
        }
    }
}

impl Drop for SoftWatchdog {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn watchdog() -> (SoftWatchdog, Arc<AtomicUsize>) {
        let resets = Arc::new(AtomicUsize::new(0));
        let counter = resets.clone();
        let wdt = SoftWatchdog::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (wdt, resets)
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_kicks_keep_unit_alive() {
        let (mut wdt, resets) = watchdog();
        wdt.arm(Duration::from_secs(1));
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            wdt.kick();
        }
        assert!(!wdt.has_expired());
        assert_eq!(resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withheld_kick_resets_unit() {
        let (mut wdt, resets) = watchdog();
        wdt.arm(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        wdt.kick();

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(!wdt.has_expired());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(wdt.has_expired());
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        // one reset only
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_expiry_resets_again() {
        let (mut wdt, resets) = watchdog();
        wdt.arm(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(wdt.has_expired());
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        // kicks after expiry do not bring it back
        wdt.kick();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        wdt.arm(Duration::from_secs(1));
        assert!(!wdt.has_expired());
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            wdt.kick();
        }
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(wdt.has_expired());
        assert_eq!(resets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unarmed_kick_is_harmless() {
        let (mut wdt, resets) = watchdog();
        wdt.kick();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!wdt.has_expired());
        assert_eq!(resets.load(Ordering::SeqCst), 0);
    }
}
