//! Right-stick-as-mouse: an auxiliary uinput pointer device fed by a
//! fixed-cadence thread. The relay stores scaled stick samples into two
//! atomic cells; the thread turns whatever is there into relative motion
//! every `poll_us` microseconds.

use ::anyhow::Result;
use ::config::MouseTuning;
use ::log::info;
use ::std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use ::std::sync::Arc;
use ::std::thread;
use ::std::time::Duration;

use crate::codes;
use crate::uinput::{Builder, UinputDevice};

/// Decide the relative move for one poll tick. Axes inside the deadzone on
/// both sides produce an explicit zero move.
pub fn mouse_delta(sense_x: f32, sense_y: f32, dead_x: f32, dead_y: f32) -> (i32, i32) {
    if sense_x.abs() > dead_x || sense_y.abs() > dead_y {
        (sense_x as i32, sense_y as i32)
    } else {
        (0, 0)
    }
}

struct Shared {
    uidev: UinputDevice,
    ready: AtomicBool,
    // f32 bit patterns; no atomic float in std
    sense_x: AtomicU32,
    sense_y: AtomicU32,
}

pub struct VirtMouse {
    shared: Arc<Shared>,
    tuning: MouseTuning,
    thread: Option<thread::JoinHandle<()>>,
}

impl VirtMouse {
    pub fn new(tuning: MouseTuning) -> Result<VirtMouse> {
        let uidev = Builder::new("Joycond Virtual Mouse", 0x057e, 0x2010)
            .prop(codes::INPUT_PROP_POINTER)
            .keys(&[codes::BTN_LEFT, codes::BTN_RIGHT])
            .rels(&[codes::REL_X, codes::REL_Y])
            .create()?;
        info!("registered virtual mouse vid: 0x057e pid: 0x2010");

        let shared = Arc::new(Shared {
            uidev,
            ready: AtomicBool::new(true),
            sense_x: AtomicU32::new(0f32.to_bits()),
            sense_y: AtomicU32::new(0f32.to_bits()),
        });

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("joycond-mouse".into())
            .spawn(move || mouse_loop(thread_shared, tuning))?;

        Ok(VirtMouse {
            shared,
            tuning,
            thread: Some(thread),
        })
    }

    /// Feed one physical event through the mouse path: stick samples update
    /// the motion cells, the two triggers click the buttons.
    pub fn relay_mouse_event(&self, ev: &::libc::input_event) {
        match (ev.type_, ev.code) {
            (codes::EV_ABS, codes::ABS_RX) => {
                let v = ev.value as f32 * self.tuning.sense_x;
                self.shared.sense_x.store(v.to_bits(), Ordering::Relaxed);
            }
            (codes::EV_ABS, codes::ABS_RY) => {
                let v = ev.value as f32 * self.tuning.sense_y;
                self.shared.sense_y.store(v.to_bits(), Ordering::Relaxed);
            }
            (codes::EV_KEY, codes::BTN_TR2) => {
                self.shared
                    .uidev
                    .write_event(codes::EV_KEY, codes::BTN_LEFT, ev.value);
                self.shared
                    .uidev
                    .write_event(codes::EV_SYN, codes::SYN_REPORT, 0);
            }
            (codes::EV_KEY, codes::BTN_TL2) => {
                self.shared
                    .uidev
                    .write_event(codes::EV_KEY, codes::BTN_RIGHT, ev.value);
                self.shared
                    .uidev
                    .write_event(codes::EV_SYN, codes::SYN_REPORT, 0);
            }
            _ => {}
        }
    }
}

impl Drop for VirtMouse {
    fn drop(&mut self) {
        self.shared.ready.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn mouse_loop(shared: Arc<Shared>, tuning: MouseTuning) {
    while shared.ready.load(Ordering::Relaxed) {
        let sx = f32::from_bits(shared.sense_x.load(Ordering::Relaxed));
        let sy = f32::from_bits(shared.sense_y.load(Ordering::Relaxed));

        let (dx, dy) = mouse_delta(sx, sy, tuning.dead_x, tuning.dead_y);
        shared.uidev.write_event(codes::EV_REL, codes::REL_X, dx);
        shared.uidev.write_event(codes::EV_REL, codes::REL_Y, dy);
        shared
            .uidev
            .write_event(codes::EV_SYN, codes::SYN_REPORT, 0);

        thread::sleep(Duration::from_micros(tuning.poll_us));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_suppresses_small_moves() {
        assert_eq!(mouse_delta(3.0, -2.0, 5.0, 5.0), (0, 0));
        assert_eq!(mouse_delta(-3.0, 0.0, 5.0, 5.0), (0, 0));
    }

    #[test]
    fn one_live_axis_moves_both() {
        // past the deadzone on x, y rides along truncated
        assert_eq!(mouse_delta(9.7, 2.2, 5.0, 5.0), (9, 2));
        assert_eq!(mouse_delta(1.0, -8.4, 5.0, 5.0), (1, -8));
    }

    #[test]
    fn truncation_not_rounding() {
        assert_eq!(mouse_delta(6.9, -6.9, 5.0, 5.0), (6, -6));
    }
}
