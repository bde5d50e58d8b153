//! One kernel-exposed Switch controller: the evdev handle, the decoded
//! model, the sysfs LED sinks, and the little bit of button state the
//! pairing flow cares about.

use ::anyhow::{Context, Result};
use ::log::{error, info, warn};
use ::std::fs;
use ::std::os::unix::io::{AsRawFd, RawFd};
use ::std::path::PathBuf;
use ::std::thread::sleep;
use ::std::time::Duration;

use crate::codes;
use crate::evdev::Device;

const LED_RESOLVE_RETRIES: u32 = 100;
const LED_RESOLVE_DELAY: Duration = Duration::from_micros(10);
const LED_WRITE_GAP: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    LeftJoycon,
    RightJoycon,
    Procon,
    Snescon,
    Sio,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    /// Just attached, not yet decided.
    Pairing,
    /// A Joy-Con awaiting a partner for combined mode.
    Waiting,
    /// A lone Joy-Con exposed sideways when combined mode is off.
    Horizontal,
    /// To be wrapped as a Pro-like virtual device.
    VirtProcon,
    /// Generic passthrough.
    Lone,
}

/// Decode the model from the raw product id. The Charging Grip reports
/// `0x200e` for both halves; the left one is the one with a left shoulder
/// button.
pub fn decode_model(product_id: u16, has_left_shoulder: bool) -> Model {
    let effective = if product_id == 0x200e {
        if has_left_shoulder {
            0x2006
        } else {
            0x2007
        }
    } else {
        product_id
    };
    match effective {
        0x2006 => Model::LeftJoycon,
        0x2007 => Model::RightJoycon,
        0x2009 => Model::Procon,
        0x2017 => Model::Snescon,
        0xf123 => Model::Sio,
        _ => Model::Unknown,
    }
}

/// The fixed pairing-state derivation. Pure so the table in the tests can
/// pin it down.
pub fn derive_pairing_state(
    product_id: u16,
    model: Model,
    is_serial: bool,
    combined: bool,
) -> PairingState {
    if product_id == 0x200e {
        return PairingState::Waiting;
    }
    if model == Model::Sio {
        return PairingState::VirtProcon;
    }
    // uart joy-cons are always willing to pair
    if is_serial {
        return PairingState::Waiting;
    }
    match model {
        Model::Procon | Model::Snescon => PairingState::VirtProcon,
        Model::LeftJoycon | Model::RightJoycon => {
            if combined {
                PairingState::Waiting
            } else {
                PairingState::Horizontal
            }
        }
        _ => PairingState::Pairing,
    }
}

/// Shoulder, trigger and menu button state tracked while unpaired.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerState {
    pub l: i32,
    pub zl: i32,
    pub r: i32,
    pub zr: i32,
    pub sl: i32,
    pub sr: i32,
    pub plus: i32,
    pub minus: i32,
}

impl TriggerState {
    /// Fold one `EV_KEY` event into the state. The same physical button
    /// reports different codes per model, so the model picks the slot.
    pub fn apply(&mut self, model: Model, code: u16, value: i32) {
        match model {
            Model::Procon | Model::Snescon => match code {
                codes::BTN_TL => self.l = value,
                codes::BTN_TL2 => self.zl = value,
                codes::BTN_TR => self.r = value,
                codes::BTN_TR2 => self.zr = value,
                codes::BTN_START => self.plus = value,
                codes::BTN_SELECT => self.minus = value,
                _ => {}
            },
            Model::Sio => match code {
                codes::BTN_TL => self.l = value,
                codes::BTN_TL2 => self.zl = value,
                codes::BTN_TR => self.r = value,
                codes::BTN_TR2 => self.zr = value,
                _ => {}
            },
            Model::LeftJoycon => match code {
                codes::BTN_TL => self.l = value,
                codes::BTN_TL2 => self.zl = value,
                codes::BTN_TR => self.sl = value,
                codes::BTN_TR2 => self.sr = value,
                _ => {}
            },
            Model::RightJoycon => match code {
                codes::BTN_TL => self.sl = value,
                codes::BTN_TL2 => self.sr = value,
                codes::BTN_TR => self.r = value,
                codes::BTN_TR2 => self.zr = value,
                _ => {}
            },
            Model::Unknown => {}
        }
    }
}

pub struct PhysCtlr {
    devpath: String,
    devnode: String,
    dev: Device,
    model: Model,
    product_id: u16,
    mac: String,
    is_serial: bool,
    triggers: TriggerState,
    player_leds: [Option<PathBuf>; 4],
    player_led_triggers: [Option<PathBuf>; 4],
    home_led: Option<PathBuf>,
}

impl PhysCtlr {
    pub fn new(devpath: &str, devnode: &str) -> Result<PhysCtlr> {
        let dev = Device::open(devnode)
            .with_context(|| format!("failed to build evdev for {}", devnode))?;

        let product_id = dev.input_id().product;
        if product_id == 0x200e {
            info!("found charging grip joy-con...");
        }
        let model = decode_model(product_id, dev.has_key(codes::BTN_TL));
        match model {
            Model::Procon => info!("found Pro Controller"),
            Model::LeftJoycon => info!("found Left Joy-Con"),
            Model::RightJoycon => info!("found Right Joy-Con"),
            Model::Snescon => info!("found SNES Controller"),
            Model::Sio => info!("found Switch Lite"),
            Model::Unknown => error!("unknown product id {:#06x}", product_id),
        }

        let mut ctlr = PhysCtlr {
            devpath: devpath.to_owned(),
            devnode: devnode.to_owned(),
            dev,
            model,
            product_id,
            mac: String::new(),
            is_serial: false,
            triggers: TriggerState::default(),
            player_leds: Default::default(),
            player_led_triggers: Default::default(),
            home_led: None,
        };

        if model != Model::Sio {
            ctlr.init_leds();
        }

        // Keep other readers away from the evdev until pairing is done.
        ctlr.dev.grab().context("failed to grab evdev")?;
        if let Err(e) = ::nix::sys::stat::fchmod(
            ctlr.fd(),
            ::nix::sys::stat::Mode::S_IRUSR | ::nix::sys::stat::Mode::S_IWUSR,
        ) {
            error!("failed to change evdev permissions: {}", e);
        }

        let driver_name = ctlr.read_sysfs_attr("name").unwrap_or_default();
        info!("driver name: {}", driver_name);
        if driver_name.contains("Serial") {
            info!("serial joy-con detected");
            // Serial joy-cons keep their player LEDs dark by default. This
            // has to run before the flag makes LED writes a no-op.
            ctlr.set_all_player_leds(false);
            ctlr.is_serial = true;
        } else if model == Model::Sio {
            info!("setting Sio as serial, ignoring lights...");
            ctlr.is_serial = true;
        }

        ctlr.mac = ctlr.read_sysfs_attr("uniq").unwrap_or_default();
        info!("MAC: {}", ctlr.mac);

        Ok(ctlr)
    }

    fn read_sysfs_attr(&self, attr: &str) -> Option<String> {
        let path = format!("/sys{}/{}", self.devpath, attr);
        fs::read_to_string(&path)
            .ok()
            .map(|s| s.trim_end().to_owned())
    }

    fn find_led_dir(&self, suffix: &str) -> Option<PathBuf> {
        let leds = format!("/sys{}/device/leds", self.devpath);
        let entries = fs::read_dir(&leds).ok()?;
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().ends_with(suffix) {
                return Some(entry.path());
            }
        }
        None
    }

    /// The LED class directories show up a moment after the event device,
    /// so each lookup retries before giving up.
    fn resolve_led_dir(&self, suffix: &str) -> Option<PathBuf> {
        for _ in 0..LED_RESOLVE_RETRIES {
            if let Some(dir) = self.find_led_dir(suffix) {
                return Some(dir);
            }
            sleep(LED_RESOLVE_DELAY);
        }
        info!("no match found for led {:?}", suffix);
        None
    }

    fn init_leds(&mut self) {
        for i in 0..4 {
            let suffix = format!("player{}", i + 1);
            if let Some(dir) = self.resolve_led_dir(&suffix) {
                self.player_leds[i] = Some(dir.join("brightness"));
                self.player_led_triggers[i] = Some(dir.join("trigger"));
            } else {
                error!("failed to resolve {} led", suffix);
            }
        }
        if self.model != Model::LeftJoycon {
            self.home_led = self.resolve_led_dir("home").map(|d| d.join("brightness"));
        }
    }

    pub fn fd(&self) -> RawFd {
        self.dev.as_raw_fd()
    }

    pub fn devpath(&self) -> &str {
        &self.devpath
    }

    pub fn devnode(&self) -> &str {
        &self.devnode
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn is_serial(&self) -> bool {
        self.is_serial
    }

    pub fn triggers(&self) -> &TriggerState {
        &self.triggers
    }

    pub fn pairing_state(&self, combined: bool) -> PairingState {
        derive_pairing_state(self.product_id, self.model, self.is_serial, combined)
    }

    /// Release exclusive access and loosen the node permissions again, for
    /// wrappers that let applications read the kernel device directly.
    pub fn release_to_world(&self) {
        if let Err(e) = self.dev.ungrab() {
            error!("failed to ungrab {}: {}", self.devnode, e);
        }
        use ::nix::sys::stat::Mode;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IWGRP | Mode::S_IROTH;
        if let Err(e) = ::nix::sys::stat::fchmod(self.fd(), mode) {
            error!("failed to restore permissions on {}: {}", self.devnode, e);
        }
    }

    /// Drain queued events, folding key state into the trigger scalars.
    pub fn handle_events(&mut self) {
        while let Some(ev) = self.dev.next_event() {
            if ev.type_ == codes::EV_KEY {
                self.triggers.apply(self.model, ev.code, ev.value);
            }
        }
    }

    /// Pull one raw event for a relay to translate.
    pub fn next_event(&mut self) -> Option<::libc::input_event> {
        self.dev.next_event()
    }

    pub fn upload_effect(&self, effect: &mut crate::evdev::ff_effect) -> ::nix::Result<i32> {
        self.dev.upload_effect(effect)
    }

    pub fn erase_effect(&self, id: i16) -> ::nix::Result<i32> {
        self.dev.erase_effect(id)
    }

    pub fn write_event(&self, type_: u16, code: u16, value: i32) {
        if let Err(e) = self.dev.write_event(type_, code, value) {
            error!("failed to forward event to {}: {}", self.devnode, e);
        }
    }

    pub fn set_player_led(&self, index: usize, on: bool) -> bool {
        if index > 3 || self.is_serial {
            return false;
        }
        let path = match &self.player_leds[index] {
            Some(p) => p,
            None => return false,
        };
        match fs::write(path, if on { "1" } else { "0" }) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to write {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn set_all_player_leds(&self, on: bool) -> bool {
        for i in 0..4 {
            if !self.set_player_led(i, on) {
                return false;
            }
            sleep(LED_WRITE_GAP);
        }
        true
    }

    /// Light the first `player` LEDs; the kernel trigger debounces, hence
    /// the gap between writes.
    pub fn set_player_leds_to_player(&self, player: usize) -> bool {
        if !(1..=4).contains(&player) {
            error!("{} is not a valid player led value", player);
            return false;
        }
        self.set_all_player_leds(false);
        for i in 0..player {
            self.set_player_led(i, true);
            sleep(LED_WRITE_GAP);
        }
        true
    }

    /// Bind the player LEDs to the kernel timer trigger so they blink while
    /// the controller waits for a partner.
    pub fn blink_player_leds(&self) -> bool {
        self.set_all_player_leds(false);
        for trigger in &self.player_led_triggers {
            let path = match trigger {
                Some(p) => p,
                None => return false,
            };
            if let Err(e) = fs::write(path, "timer") {
                error!(
                    "failed to select LED timer trigger ({}); is ledtrig-timer probed?",
                    e
                );
                return false;
            }
        }
        true
    }

    pub fn set_home_led(&self, brightness: u16) -> bool {
        if brightness > 15 {
            return false;
        }
        let path = match &self.home_led {
            Some(p) => p,
            None => return false,
        };
        match fs::write(path, brightness.to_string()) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to write home led: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_decoding() {
        assert_eq!(decode_model(0x2009, false), Model::Procon);
        assert_eq!(decode_model(0x2006, true), Model::LeftJoycon);
        assert_eq!(decode_model(0x2007, false), Model::RightJoycon);
        assert_eq!(decode_model(0x2017, false), Model::Snescon);
        assert_eq!(decode_model(0xf123, false), Model::Sio);
        assert_eq!(decode_model(0x1234, false), Model::Unknown);
    }

    #[test]
    fn charging_grip_disambiguates_on_left_shoulder() {
        assert_eq!(decode_model(0x200e, true), Model::LeftJoycon);
        assert_eq!(decode_model(0x200e, false), Model::RightJoycon);
    }

    #[test]
    fn pairing_state_table() {
        use PairingState::*;
        // charging grip wins over everything else
        assert_eq!(derive_pairing_state(0x200e, Model::LeftJoycon, false, true), Waiting);
        assert_eq!(derive_pairing_state(0xf123, Model::Sio, true, true), VirtProcon);
        // serial joy-cons always accept pairing
        assert_eq!(derive_pairing_state(0x2006, Model::LeftJoycon, true, false), Waiting);
        assert_eq!(derive_pairing_state(0x2009, Model::Procon, false, true), VirtProcon);
        assert_eq!(derive_pairing_state(0x2017, Model::Snescon, false, false), VirtProcon);
        assert_eq!(derive_pairing_state(0x2006, Model::LeftJoycon, false, true), Waiting);
        assert_eq!(derive_pairing_state(0x2007, Model::RightJoycon, false, true), Waiting);
        // lone joy-cons go sideways when combining is off
        assert_eq!(derive_pairing_state(0x2006, Model::LeftJoycon, false, false), Horizontal);
        assert_eq!(derive_pairing_state(0x2007, Model::RightJoycon, false, false), Horizontal);
        assert_eq!(derive_pairing_state(0x1234, Model::Unknown, false, true), Pairing);
    }

    #[test]
    fn trigger_state_follows_model() {
        let mut t = TriggerState::default();
        t.apply(Model::Procon, codes::BTN_TL2, 1);
        assert_eq!(t.zl, 1);
        t.apply(Model::Procon, codes::BTN_START, 1);
        assert_eq!(t.plus, 1);

        // the same codes mean the side buttons on a right joy-con
        let mut t = TriggerState::default();
        t.apply(Model::RightJoycon, codes::BTN_TL, 1);
        t.apply(Model::RightJoycon, codes::BTN_TL2, 1);
        assert_eq!((t.sl, t.sr), (1, 1));
        assert_eq!((t.l, t.zl), (0, 0));

        let mut t = TriggerState::default();
        t.apply(Model::LeftJoycon, codes::BTN_TR, 1);
        assert_eq!(t.sl, 1);
        t.apply(Model::LeftJoycon, codes::BTN_TR, 0);
        assert_eq!(t.sl, 0);
    }
}
