//! The combined wrapper: a left and a right Joy-Con merged behind one
//! Pro-shaped uinput device. The kernel driver already reports unified
//! gamepad codes for paired Joy-Cons, so both members feed the same
//! translation pipeline; force-feedback uploads fan out to every member so
//! rumble reaches both hands.

use ::anyhow::Result;
use ::config::{Mapping, MouseTuning};
use ::log::{error, info};
use ::std::os::unix::io::{AsRawFd, RawFd};
use ::std::sync::Arc;

use crate::codes;
use crate::phys_ctlr::{Model, PhysCtlr};
use crate::relay::{self, FfProxy};
use crate::uinput::UinputDevice;
use crate::virt_ctlr::VirtCtlr;
use crate::virt_ctlr_pro::build_pro_device;
use crate::virt_mouse::VirtMouse;

pub struct VirtCtlrCombined {
    left: Option<PhysCtlr>,
    right: Option<PhysCtlr>,
    uidev: UinputDevice,
    mouse: VirtMouse,
    proxy: FfProxy,
    mapping: Arc<Mapping>,
    left_mac: String,
    right_mac: String,
}

impl VirtCtlrCombined {
    pub fn new(
        left: PhysCtlr,
        right: PhysCtlr,
        mapping: Arc<Mapping>,
        tuning: MouseTuning,
    ) -> Result<VirtCtlrCombined> {
        let uidev = build_pro_device(mapping.analog(), true)?;
        let mouse = VirtMouse::new(tuning)?;
        info!(
            "created combined joy-con input from {} and {}",
            left.devnode(),
            right.devnode()
        );

        Ok(VirtCtlrCombined {
            left_mac: left.mac().to_owned(),
            right_mac: right.mac().to_owned(),
            left: Some(left),
            right: Some(right),
            uidev,
            mouse,
            proxy: FfProxy::new(),
            mapping,
        })
    }

    fn members(&self) -> Vec<&PhysCtlr> {
        self.left.iter().chain(self.right.iter()).collect()
    }

    fn relay_side(&mut self, fd: RawFd) -> bool {
        let side = if self.left.as_ref().map_or(false, |p| p.fd() == fd) {
            self.left.as_mut()
        } else if self.right.as_ref().map_or(false, |p| p.fd() == fd) {
            self.right.as_mut()
        } else {
            None
        };
        let phys = match side {
            Some(p) => p,
            None => return false,
        };
        while let Some(ev) = phys.next_event() {
            relay::relay_phys_event(&self.uidev, &self.mouse, &self.mapping, &ev);
        }
        true
    }
}

impl VirtCtlr for VirtCtlrCombined {
    fn handle_events(&mut self, fd: RawFd) {
        if self.relay_side(fd) {
            return;
        }
        if fd == self.uidev.as_raw_fd() {
            let members = self.left.iter().chain(self.right.iter()).collect::<Vec<_>>();
            relay::handle_uinput_events(&self.uidev, &members, &mut self.proxy);
        } else {
            error!("fd={} is not owned by this combined controller", fd);
        }
    }

    fn contains_fd(&self, fd: RawFd) -> bool {
        self.members().iter().any(|p| p.fd() == fd) || fd == self.uidev.as_raw_fd()
    }

    fn contains_phys(&self, devpath: &str) -> bool {
        self.members().iter().any(|p| p.devpath() == devpath)
    }

    fn phys_ctlrs(&self) -> Vec<&PhysCtlr> {
        self.members()
    }

    fn uinput_fds(&self) -> Vec<RawFd> {
        vec![self.uidev.as_raw_fd()]
    }

    fn supports_hotplug(&self) -> bool {
        true
    }

    fn needs_model(&self) -> Model {
        if self.left.is_none() {
            Model::LeftJoycon
        } else if self.right.is_none() {
            Model::RightJoycon
        } else {
            Model::Unknown
        }
    }

    fn no_ctlrs_left(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    fn mac_belongs(&self, mac: &str) -> bool {
        !mac.is_empty() && (self.left_mac == mac || self.right_mac == mac)
    }

    fn add_phys_ctlr(&mut self, phys: PhysCtlr) {
        match phys.model() {
            Model::LeftJoycon if self.left.is_none() => {
                self.left_mac = phys.mac().to_owned();
                self.left = Some(phys);
            }
            Model::RightJoycon if self.right.is_none() => {
                self.right_mac = phys.mac().to_owned();
                self.right = Some(phys);
            }
            // unexpected model: take whichever side is free
            _ if self.left.is_none() => {
                self.left_mac = phys.mac().to_owned();
                self.left = Some(phys);
            }
            _ if self.right.is_none() => {
                self.right_mac = phys.mac().to_owned();
                self.right = Some(phys);
            }
            _ => error!("combined controller already has both joy-cons"),
        }
    }

    fn remove_phys_ctlr(&mut self, devpath: &str) -> Option<PhysCtlr> {
        if self.left.as_ref().map_or(false, |p| p.devpath() == devpath) {
            self.left.take()
        } else if self.right.as_ref().map_or(false, |p| p.devpath() == devpath) {
            self.right.take()
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
