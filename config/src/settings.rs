use ::serde_derive::Deserialize;
use ::std::path::PathBuf;

/// Daemon settings, deserialized from the TOML configuration file. Every
/// field is optional in the file; absent fields take these defaults.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Pair two Joy-Cons into one combined device.
    pub combined: bool,
    /// Emit ZL/ZR as analog ABS_Z/ABS_RZ axes.
    pub analog: bool,
    /// Right stick drives a virtual mouse.
    pub rsmouse: bool,
    pub mouse_sense_x: f32,
    pub mouse_sense_y: f32,
    pub mouse_dead_x: i32,
    pub mouse_dead_y: i32,
    /// Mouse emission cadence in microseconds.
    pub mouse_poll: u64,
    /// Directory holding the persisted layout file.
    pub layout_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            combined: true,
            analog: true,
            rsmouse: true,
            mouse_sense_x: 0.0003,
            mouse_sense_y: 0.0003,
            mouse_dead_x: 5,
            mouse_dead_y: 5,
            mouse_poll: 10000,
            layout_dir: PathBuf::from("/var/lib/joycond"),
        }
    }
}

/// The per-mouse-device tuning captured from [`Settings`] at wrapper
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseTuning {
    pub sense_x: f32,
    pub sense_y: f32,
    pub dead_x: f32,
    pub dead_y: f32,
    pub poll_us: u64,
}

impl From<&Settings> for MouseTuning {
    fn from(s: &Settings) -> Self {
        MouseTuning {
            sense_x: s.mouse_sense_x,
            sense_y: s.mouse_sense_y,
            dead_x: s.mouse_dead_x as f32,
            dead_y: s.mouse_dead_y as f32,
            poll_us: s.mouse_poll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert!(s.combined && s.analog && s.rsmouse);
        assert_eq!(s.mouse_sense_x, 0.0003);
        assert_eq!(s.mouse_dead_y, 5);
        assert_eq!(s.mouse_poll, 10000);
        assert_eq!(s.layout_dir, PathBuf::from("/var/lib/joycond"));
    }

    #[test]
    fn tuning_captures_settings() {
        let mut s = Settings::default();
        s.mouse_sense_y = 0.001;
        s.mouse_dead_x = 8;
        let t = MouseTuning::from(&s);
        assert_eq!(t.sense_y, 0.001);
        assert_eq!(t.dead_x, 8.0);
        assert_eq!(t.poll_us, 10000);
    }
}
