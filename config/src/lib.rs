//! Shared configuration for the joycond daemon: the live [`Mapping`] record
//! consumed by the event relays, the persisted key-layout file format, and
//! the TOML settings the daemon loads at startup.

use ::std::collections::HashMap;
use ::std::sync::atomic::{AtomicBool, Ordering};
use ::std::sync::Mutex;

mod layout;
mod settings;

pub use layout::{default_layout, format_layout, load_or_init_layout, parse_layout, LayoutError};
pub use settings::{MouseTuning, Settings};

/// The one record shared between the relay thread and whatever mutates the
/// configuration at runtime. `layout` is guarded by its mutex; the three
/// booleans are plain atomics read with relaxed loads on the hot path, where
/// an event processed against a stale value is harmless.
pub struct Mapping {
    layout: Mutex<HashMap<u32, u32>>,
    combined: AtomicBool,
    analog: AtomicBool,
    rsmouse: AtomicBool,
}

impl Mapping {
    pub fn new(settings: &Settings, layout: HashMap<u32, u32>) -> Self {
        Mapping {
            layout: Mutex::new(layout),
            combined: AtomicBool::new(settings.combined),
            analog: AtomicBool::new(settings.analog),
            rsmouse: AtomicBool::new(settings.rsmouse),
        }
    }

    pub fn combined(&self) -> bool {
        self.combined.load(Ordering::Relaxed)
    }

    pub fn set_combined(&self, on: bool) {
        self.combined.store(on, Ordering::Relaxed);
    }

    pub fn analog(&self) -> bool {
        self.analog.load(Ordering::Relaxed)
    }

    pub fn set_analog(&self, on: bool) {
        self.analog.store(on, Ordering::Relaxed);
    }

    pub fn rsmouse(&self) -> bool {
        self.rsmouse.load(Ordering::Relaxed)
    }

    pub fn set_rsmouse(&self, on: bool) {
        self.rsmouse.store(on, Ordering::Relaxed);
    }

    pub fn toggle_rsmouse(&self) -> bool {
        // fetch_xor returns the previous value
        !self.rsmouse.fetch_xor(true, Ordering::Relaxed)
    }

    /// Look up the remap target for a key code. Takes the layout lock for the
    /// duration of the lookup only.
    pub fn lookup(&self, code: u32) -> Option<u32> {
        self.layout.lock().unwrap().get(&code).copied()
    }

    /// Merge entries into the layout, overwriting existing bindings.
    pub fn set_layout<I: IntoIterator<Item = (u32, u32)>>(&self, entries: I) {
        let mut layout = self.layout.lock().unwrap();
        for (from, to) in entries {
            layout.insert(from, to);
        }
    }

    /// Snapshot of the current layout, sorted by source code.
    pub fn layout_pairs(&self) -> Vec<(u32, u32)> {
        let layout = self.layout.lock().unwrap();
        let mut pairs: Vec<_> = layout.iter().map(|(&f, &t)| (f, t)).collect();
        pairs.sort_unstable();
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> Mapping {
        Mapping::new(&Settings::default(), default_layout())
    }

    #[test]
    fn lookup_follows_layout() {
        let m = mapping();
        assert_eq!(m.lookup(304), Some(304));
        m.set_layout(vec![(304, 310)]);
        assert_eq!(m.lookup(304), Some(310));
        assert_eq!(m.lookup(306), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let m = mapping();
        m.set_layout(vec![(304, 310), (310, 304)]);
        let pairs = m.layout_pairs();
        assert!(pairs.contains(&(304, 310)));
        assert!(pairs.contains(&(310, 304)));
    }

    #[test]
    fn rsmouse_toggles() {
        let m = mapping();
        assert!(m.rsmouse());
        assert!(!m.toggle_rsmouse());
        assert!(!m.rsmouse());
        assert!(m.toggle_rsmouse());
    }
}
