// Kicker / chipper solenoid task
//
// The main loop signals a signed magnitude: positive fires the kicker,
// negative the chipper. The task holds the chosen solenoid at |magnitude|/100
// duty for KICK_PULSE, then releases it. Pulses never overlap and never queue:
// signals that arrive before the task wakes collapse into one pulse, and a
// signal that arrives mid-pulse only adjusts the duty of the solenoid already
// firing, without extending the pulse. A mid-pulse signal for the other
// solenoid is dropped, so one burst energises one solenoid.

use std::sync::Arc;
use std::sync::atomic::{AtomicI8, Ordering};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::config::KICK_PULSE;
use crate::hw::PwmPin;

const SOLENOIDS: [&str; 2] = ["kicker", "chipper"];

#[derive(Debug, Default)]
struct KickSignal {
    magnitude: AtomicI8,
    notify: Notify,
}

/// Handle used to request a pulse
#[derive(Debug, Clone)]
pub struct Kicker {
    signal: Arc<KickSignal>,
}

impl Kicker {
    /// Request a pulse. Zero is ignored.
    pub fn signal(&self, magnitude: i8) {
        if magnitude == 0 {
            return;
        }
        self.signal.magnitude.store(magnitude, Ordering::Release);
        self.signal.notify.notify_one();
    }
}

/// Duty for a requested magnitude, saturating at full duty
pub fn pulse_duty(magnitude: i8) -> f32 {
    (magnitude.unsigned_abs() as f32 / 100.0).min(1.0)
}

/// Index into SOLENOIDS
fn solenoid(magnitude: i8) -> usize {
    usize::from(magnitude < 0)
}

/// Start the solenoid task. Both outputs are forced off first.
pub fn spawn_kicker(kicker: Box<dyn PwmPin>, chipper: Box<dyn PwmPin>) -> (Kicker, JoinHandle<()>) {
    let mut pins = [kicker, chipper];
    for pin in &mut pins {
        pin.set_duty(0.0);
    }

    let signal = Arc::new(KickSignal::default());
    let handle = Kicker {
        signal: signal.clone(),
    };

    let task = tokio::spawn(async move {
        info!("Kicker task started");
        loop {
            signal.notify.notified().await;
            let magnitude = signal.magnitude.swap(0, Ordering::AcqRel);
            if magnitude == 0 {
                continue;
            }

            let active = solenoid(magnitude);
            debug!("Firing {} at {:.2} duty", SOLENOIDS[active], pulse_duty(magnitude));
            pins[active].set_duty(pulse_duty(magnitude));

            let end = Instant::now() + KICK_PULSE;
            loop {
                tokio::select! {
                    _ = sleep_until(end) => break,
                    _ = signal.notify.notified() => {
                        let latest = signal.magnitude.swap(0, Ordering::AcqRel);
                        if latest == 0 {
                            continue;
                        }
                        if solenoid(latest) != active {
                            debug!(
                                "Dropping {} request while {} fires",
                                SOLENOIDS[solenoid(latest)],
                                SOLENOIDS[active]
                            );
                            continue;
                        }
                        debug!(
                            "Retargeting pulse: {} at {:.2} duty",
                            SOLENOIDS[active],
                            pulse_duty(latest)
                        );
                        pins[active].set_duty(pulse_duty(latest));
                    }
                }
            }
            pins[active].set_duty(0.0);
        }
    });

    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::{EventLog, HwEvent, SimPwm};
    use std::time::Duration;

    fn rig() -> (Kicker, JoinHandle<()>, EventLog) {
        let log = EventLog::new();
        let kicker = SimPwm::new("kicker", &log);
        let chipper = SimPwm::new("chipper", &log);
        let (handle, task) = spawn_kicker(Box::new(kicker), Box::new(chipper));
        log.clear();
        (handle, task, log)
    }

    fn pulses(log: &EventLog) -> Vec<HwEvent> {
        log.events()
            .into_iter()
            .filter(|e| matches!(e, HwEvent::Duty { duty, .. } if *duty > 0.0))
            .collect()
    }

    #[test]
    fn test_pulse_duty() {
        assert_eq!(pulse_duty(50), 0.5);
        assert_eq!(pulse_duty(-50), 0.5);
        assert_eq!(pulse_duty(100), 1.0);
        assert_eq!(pulse_duty(127), 1.0);
        assert_eq!(pulse_duty(-128), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_pulse() {
        let (kicker, task, log) = rig();
        kicker.signal(60);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            log.events(),
            vec![HwEvent::Duty {
                pin: "kicker",
                duty: 0.6
            }]
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            log.events().last(),
            Some(&HwEvent::Duty {
                pin: "kicker",
                duty: 0.0
            })
        );
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_magnitude_chips() {
        let (kicker, task, log) = rig();
        kicker.signal(-30);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            pulses(&log),
            vec![HwEvent::Duty {
                pin: "chipper",
                duty: 0.3
            }]
        );
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_signals_coalesce_to_latest() {
        let (kicker, task, log) = rig();
        kicker.signal(40);
        kicker.signal(80);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            pulses(&log),
            vec![HwEvent::Duty {
                pin: "kicker",
                duty: 0.8
            }]
        );
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_during_pulse_retargets_it() {
        let (kicker, task, log) = rig();
        kicker.signal(50);
        tokio::time::sleep(Duration::from_millis(2)).await;
        kicker.signal(80);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            log.events().last(),
            Some(&HwEvent::Duty {
                pin: "kicker",
                duty: 0.8
            })
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        // one 10 ms pulse, not two
        assert_eq!(
            log.events(),
            vec![
                HwEvent::Duty {
                    pin: "kicker",
                    duty: 0.5
                },
                HwEvent::Duty {
                    pin: "kicker",
                    duty: 0.8
                },
                HwEvent::Duty {
                    pin: "kicker",
                    duty: 0.0
                },
            ]
        );
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_pulse_chip_request_never_fires_chipper() {
        let (kicker, task, log) = rig();
        kicker.signal(50);
        tokio::time::sleep(Duration::from_millis(2)).await;
        kicker.signal(-20);
        tokio::time::sleep(Duration::from_millis(1)).await;
        kicker.signal(-70);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the kicker finishes its own pulse and nothing follows it
        assert_eq!(
            log.events(),
            vec![
                HwEvent::Duty {
                    pin: "kicker",
                    duty: 0.5
                },
                HwEvent::Duty {
                    pin: "kicker",
                    duty: 0.0
                },
            ]
        );
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_request_after_pulse_fires() {
        let (kicker, task, log) = rig();
        kicker.signal(30);
        tokio::time::sleep(Duration::from_millis(20)).await;
        kicker.signal(-40);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            pulses(&log),
            vec![
                HwEvent::Duty {
                    pin: "kicker",
                    duty: 0.3
                },
                HwEvent::Duty {
                    pin: "chipper",
                    duty: 0.4
                },
            ]
        );
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_signal_ignored() {
        let (kicker, task, log) = rig();
        kicker.signal(0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log.events().is_empty());
        task.abort();
    }
}
