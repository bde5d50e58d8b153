//! The passthrough wrapper: no relay at all. The physical device is
//! ungrabbed and its node permissions restored, so applications read the
//! kernel device directly; this wrapper only keeps the slot and drains the
//! event queue to stay current.

use ::log::error;
use ::std::os::unix::io::RawFd;

use crate::phys_ctlr::{Model, PhysCtlr};
use crate::virt_ctlr::VirtCtlr;

pub struct VirtCtlrPassthrough {
    phys: PhysCtlr,
    mac: String,
}

impl VirtCtlrPassthrough {
    pub fn new(phys: PhysCtlr) -> VirtCtlrPassthrough {
        phys.release_to_world();
        VirtCtlrPassthrough {
            mac: phys.mac().to_owned(),
            phys,
        }
    }
}

impl VirtCtlr for VirtCtlrPassthrough {
    fn handle_events(&mut self, fd: RawFd) {
        if fd == self.phys.fd() {
            self.phys.handle_events();
        } else {
            error!("fd={} is not owned by this passthrough controller", fd);
        }
    }

    fn contains_fd(&self, fd: RawFd) -> bool {
        fd == self.phys.fd()
    }

    fn contains_phys(&self, devpath: &str) -> bool {
        self.phys.devpath() == devpath
    }

    fn phys_ctlrs(&self) -> Vec<&PhysCtlr> {
        vec![&self.phys]
    }

    fn uinput_fds(&self) -> Vec<RawFd> {
        Vec::new()
    }

    fn supports_hotplug(&self) -> bool {
        false
    }

    fn needs_model(&self) -> Model {
        Model::Unknown
    }

    fn no_ctlrs_left(&self) -> bool {
        false
    }

    fn mac_belongs(&self, mac: &str) -> bool {
        !mac.is_empty() && self.mac == mac
    }

    fn add_phys_ctlr(&mut self, _phys: PhysCtlr) {
        error!("passthrough controllers do not take additional controllers");
    }

    fn remove_phys_ctlr(&mut self, _devpath: &str) -> Option<PhysCtlr> {
        error!("passthrough controllers do not release their controller");
        None
    }

    fn set_player_leds_to_player(&self, player: usize) -> bool {
        self.phys.set_player_leds_to_player(player)
    }
}
