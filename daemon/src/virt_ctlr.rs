//! The capability set every virtual-controller wrapper offers the pairing
//! manager. Three flavors exist: passthrough (one phys, kernel device
//! exposed as-is), Pro-like relay (one phys behind a translated uinput
//! device), and combined (two Joy-Cons behind one uinput device).

use ::std::os::unix::io::RawFd;

use crate::phys_ctlr::{Model, PhysCtlr};

pub trait VirtCtlr {
    /// Drive whichever of this wrapper's fds became ready.
    fn handle_events(&mut self, fd: RawFd);

    fn contains_fd(&self, fd: RawFd) -> bool;

    fn contains_phys(&self, devpath: &str) -> bool;

    fn phys_ctlrs(&self) -> Vec<&PhysCtlr>;

    /// The uinput fds this wrapper wants driven by the event loop (empty
    /// for passthrough).
    fn uinput_fds(&self) -> Vec<RawFd>;

    /// Whether members may come and go over this wrapper's lifetime.
    fn supports_hotplug(&self) -> bool;

    /// The model this wrapper is currently missing, `Unknown` if none.
    fn needs_model(&self) -> Model;

    fn no_ctlrs_left(&self) -> bool;

    /// Whether a reconnecting controller with this MAC belongs here.
    fn mac_belongs(&self, mac: &str) -> bool;

    fn add_phys_ctlr(&mut self, phys: PhysCtlr);

    fn remove_phys_ctlr(&mut self, devpath: &str) -> Option<PhysCtlr>;

    fn set_player_leds_to_player(&self, player: usize) -> bool;
}
