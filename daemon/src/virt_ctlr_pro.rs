//! The Pro-like wrapper: one physical controller behind a freshly created
//! "Nintendo Switch Virtual Pro Controller" uinput device, with the full
//! bidirectional relay.

use ::anyhow::Result;
use ::config::{Mapping, MouseTuning};
use ::log::{error, info};
use ::std::os::unix::io::{AsRawFd, RawFd};
use ::std::sync::Arc;

use crate::codes;
use crate::phys_ctlr::{Model, PhysCtlr};
use crate::relay::{self, FfProxy};
use crate::uinput::{Builder, UinputDevice};
use crate::virt_ctlr::VirtCtlr;
use crate::virt_mouse::VirtMouse;

const STICK_RANGE: i32 = 32767;
const STICK_FUZZ: i32 = 250;
const STICK_FLAT: i32 = 500;

/// Build the Pro-shaped uinput device. This configuration mirrors what the
/// hid-nintendo driver advertises for a real Pro Controller, with the bus
/// type pinned to USB so games do not dismiss the device as virtual.
pub fn build_pro_device(analog: bool, with_leds: bool) -> Result<UinputDevice> {
    let mut keys = vec![
        codes::BTN_SOUTH,
        codes::BTN_EAST,
        codes::BTN_NORTH,
        codes::BTN_WEST,
        codes::BTN_Z,
        codes::BTN_TL,
        codes::BTN_TR,
        codes::BTN_SELECT,
        codes::BTN_START,
        codes::BTN_MODE,
        codes::BTN_THUMBL,
        codes::BTN_THUMBR,
        codes::BTN_DPAD_UP,
        codes::BTN_DPAD_DOWN,
        codes::BTN_DPAD_LEFT,
        codes::BTN_DPAD_RIGHT,
    ];
    // with analog emulation the triggers exist only as axes
    if !analog {
        keys.push(codes::BTN_TL2);
        keys.push(codes::BTN_TR2);
    }

    let mut builder = Builder::new("Nintendo Switch Virtual Pro Controller", 0x057e, 0x2008)
        .keys(&keys)
        .abs(codes::ABS_X, -STICK_RANGE, STICK_RANGE, STICK_FUZZ, STICK_FLAT)
        .abs(codes::ABS_Y, -STICK_RANGE, STICK_RANGE, STICK_FUZZ, STICK_FLAT)
        .abs(codes::ABS_RX, -STICK_RANGE, STICK_RANGE, STICK_FUZZ, STICK_FLAT)
        .abs(codes::ABS_RY, -STICK_RANGE, STICK_RANGE, STICK_FUZZ, STICK_FLAT)
        .abs(codes::ABS_HAT0X, -1, 1, 0, 0)
        .abs(codes::ABS_HAT0Y, -1, 1, 0, 0)
        .ff(
            &[
                codes::FF_RUMBLE,
                codes::FF_PERIODIC,
                codes::FF_SQUARE,
                codes::FF_TRIANGLE,
                codes::FF_SINE,
                codes::FF_GAIN,
            ],
            10,
        );
    if analog {
        builder = builder
            .abs(codes::ABS_Z, 0, 1, 0, 0)
            .abs(codes::ABS_RZ, 0, 1, 0, 0);
    }
    if with_leds {
        builder = builder.leds(&[0, 1, 2, 3]);
    }
    builder.create()
}

pub struct VirtCtlrPro {
    phys: Option<PhysCtlr>,
    uidev: UinputDevice,
    mouse: VirtMouse,
    proxy: FfProxy,
    mapping: Arc<Mapping>,
    mac: String,
}

impl VirtCtlrPro {
    pub fn new(phys: PhysCtlr, mapping: Arc<Mapping>, tuning: MouseTuning) -> Result<VirtCtlrPro> {
        // the axis set is latched here; later toggles of `analog` do not
        // rebuild the device
        let uidev = build_pro_device(mapping.analog(), phys.model() != Model::Sio)?;
        let mouse = VirtMouse::new(tuning)?;
        info!("created virtual pro controller for {}", phys.devnode());

        Ok(VirtCtlrPro {
            mac: phys.mac().to_owned(),
            phys: Some(phys),
            uidev,
            mouse,
            proxy: FfProxy::new(),
            mapping,
        })
    }

    fn relay_phys(&mut self) {
        let phys = match self.phys.as_mut() {
            Some(p) => p,
            None => return,
        };
        while let Some(ev) = phys.next_event() {
            relay::relay_phys_event(&self.uidev, &self.mouse, &self.mapping, &ev);
        }
    }
}

impl VirtCtlr for VirtCtlrPro {
    fn handle_events(&mut self, fd: RawFd) {
        if self.phys.as_ref().map_or(false, |p| p.fd() == fd) {
            self.relay_phys();
        } else if fd == self.uidev.as_raw_fd() {
            let members: Vec<&PhysCtlr> = self.phys.iter().collect();
            relay::handle_uinput_events(&self.uidev, &members, &mut self.proxy);
        } else {
            error!("fd={} is not owned by this virtual pro controller", fd);
        }
    }

    fn contains_fd(&self, fd: RawFd) -> bool {
        self.phys.as_ref().map_or(false, |p| p.fd() == fd) || fd == self.uidev.as_raw_fd()
    }

    fn contains_phys(&self, devpath: &str) -> bool {
        self.phys.as_ref().map_or(false, |p| p.devpath() == devpath)
    }

    fn phys_ctlrs(&self) -> Vec<&PhysCtlr> {
        self.phys.iter().collect()
    }

    fn uinput_fds(&self) -> Vec<RawFd> {
        vec![self.uidev.as_raw_fd()]
    }

    fn supports_hotplug(&self) -> bool {
        true
    }

    fn needs_model(&self) -> Model {
        Model::Unknown
    }

    fn no_ctlrs_left(&self) -> bool {
        self.phys.is_none()
    }

    fn mac_belongs(&self, mac: &str) -> bool {
        !mac.is_empty() && self.mac == mac
    }

    fn add_phys_ctlr(&mut self, phys: PhysCtlr) {
        if self.phys.is_some() {
            error!("virtual pro controller already has its controller");
            return;
        }
        if self.mac.is_empty() {
            self.mac = phys.mac().to_owned();
        }
        self.phys = Some(phys);
    }

    fn remove_phys_ctlr(&mut self, devpath: &str) -> Option<PhysCtlr> {
        if self.contains_phys(devpath) {
            self.phys.take()
        } else {
            None
        }
    }

    fn set_player_leds_to_player(&self, player: usize) -> bool {
        if !(1..=4).contains(&player) {
            error!("{} is not a valid player led value", player);
            return false;
        }
        for i in 0..player {
            self.uidev.write_event(codes::EV_LED, i as u16, 1);
        }
        true
    }
}
