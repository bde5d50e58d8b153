//! The pairing manager: owns every physical controller that has not been
//! wrapped yet, the slot table of live wrappers, and the stale wrappers
//! kept around for a same-MAC reconnect. All the interesting lifecycle —
//! Joy-Con pairing, transport switches, reconnects — funnels through
//! `add_ctlr`/`remove_ctlr`.

use ::anyhow::Result;
use ::config::{Mapping, MouseTuning};
use ::log::{error, info};
use ::std::collections::HashMap;
use ::std::os::unix::io::RawFd;
use ::std::sync::Arc;

use crate::event_loop::{EventLoop, Subscriber};
use crate::phys_ctlr::{Model, PairingState, PhysCtlr};
use crate::virt_ctlr::VirtCtlr;
use crate::virt_ctlr_combined::VirtCtlrCombined;
use crate::virt_ctlr_passthrough::VirtCtlrPassthrough;
use crate::virt_ctlr_pro::VirtCtlrPro;

/// The lowest reusable slot index, or `None` to append.
fn first_empty_slot(paired: &[Option<Box<dyn VirtCtlr>>]) -> Option<usize> {
    paired.iter().position(|v| v.is_none())
}

fn player_for_slot(slot: usize) -> usize {
    slot % 4 + 1
}

/// Registration handle for a wrapper's uinput fd. Reconstructable, so the
/// manager does not have to store it.
fn uinput_sub(fd: RawFd) -> Subscriber {
    Subscriber::new(format!("uinput:{}", fd), vec![fd])
}

pub struct CtlrMgr {
    mapping: Arc<Mapping>,
    tuning: MouseTuning,
    unpaired: HashMap<String, PhysCtlr>,
    paired: Vec<Option<Box<dyn VirtCtlr>>>,
    stale: Vec<Box<dyn VirtCtlr>>,
    left: Option<String>,
    right: Option<String>,
    subscribers: HashMap<String, Subscriber>,
}

impl CtlrMgr {
    pub fn new(mapping: Arc<Mapping>, tuning: MouseTuning) -> CtlrMgr {
        CtlrMgr {
            mapping,
            tuning,
            unpaired: HashMap::new(),
            paired: Vec::new(),
            stale: Vec::new(),
            left: None,
            right: None,
            subscribers: HashMap::new(),
        }
    }

    fn place_at(&mut self, slot: usize, virt: Box<dyn VirtCtlr>) {
        if slot < self.paired.len() {
            debug_assert!(self.paired[slot].is_none());
            self.paired[slot] = Some(virt);
        } else {
            self.paired.push(Some(virt));
        }
    }

    fn next_slot(&self) -> usize {
        first_empty_slot(&self.paired).unwrap_or_else(|| self.paired.len())
    }

    fn clear_pending(&mut self, devpath: &str) {
        if self.left.as_deref() == Some(devpath) {
            self.left = None;
        }
        if self.right.as_deref() == Some(devpath) {
            self.right = None;
        }
    }

    pub fn add_ctlr(&mut self, ev: &mut EventLoop, devpath: &str, devname: &str) -> Result<()> {
        if self.unpaired.contains_key(devpath) {
            error!("attempting to add existing phys ctlr {}", devpath);
            return Ok(());
        }

        info!("creating new phys ctlr for {}", devname);
        let phys = PhysCtlr::new(devpath, devname)?;
        if !phys.blink_player_leds() {
            info!("pairing without led blink for {}", devname);
        }
        let mac = phys.mac().to_owned();
        let model = phys.model();
        let sub = Subscriber::new(devpath.to_owned(), vec![phys.fd()]);
        ev.add_subscriber(&sub);
        self.subscribers.insert(devpath.to_owned(), sub);
        self.unpaired.insert(devpath.to_owned(), phys);

        // a stale wrapper with this MAC gets its slot back, with this phys
        // attached right away
        if !mac.is_empty() {
            if let Some(idx) = self.stale.iter().position(|v| v.mac_belongs(&mac)) {
                info!("re-pairing stale controller");
                let mut virt = self.stale.remove(idx);
                let phys = self.unpaired.remove(devpath).unwrap();
                let slot = self.next_slot();
                let player = player_for_slot(slot);
                phys.set_player_leds_to_player(player);
                virt.add_phys_ctlr(phys);
                virt.set_player_leds_to_player(player);
                self.place_at(slot, virt);
                return Ok(());
            }
        }

        // same MAC inside a live wrapper means the controller changed
        // transport; swap the member without giving up the slot
        if !mac.is_empty() {
            let mut replace = None;
            'paired: for (slot, virt) in self.paired.iter().enumerate() {
                if let Some(virt) = virt {
                    if !virt.supports_hotplug() {
                        continue;
                    }
                    for member in virt.phys_ctlrs() {
                        if member.mac() == mac {
                            replace = Some((slot, member.devpath().to_owned()));
                            break 'paired;
                        }
                    }
                }
            }
            if let Some((slot, old_devpath)) = replace {
                info!("replacing controller (likely a wireless to wired switch)");
                if let Some(sub) = self.subscribers.remove(&old_devpath) {
                    ev.remove_subscriber(&sub);
                }
                let phys = self.unpaired.remove(devpath).unwrap();
                phys.set_player_leds_to_player(player_for_slot(slot));
                let virt = self.paired[slot].as_mut().unwrap();
                virt.remove_phys_ctlr(&old_devpath);
                virt.add_phys_ctlr(phys);
                return Ok(());
            }
        }

        // a hotplug wrapper missing exactly this model (or emptied out) is a
        // reconnect target
        let reconnect = self.paired.iter().position(|virt| {
            virt.as_ref().map_or(false, |virt| {
                virt.supports_hotplug()
                    && ((virt.needs_model() == model && model != Model::Unknown)
                        || virt.no_ctlrs_left())
            })
        });
        if let Some(slot) = reconnect {
            info!("detected reconnected joy-con");
            let phys = self.unpaired.remove(devpath).unwrap();
            phys.set_player_leds_to_player(player_for_slot(slot));
            self.paired[slot].as_mut().unwrap().add_phys_ctlr(phys);
            return Ok(());
        }

        // some controllers pair without any button press; give this one a
        // chance right away
        if let Some(fd) = self.unpaired.get(devpath).map(|p| p.fd()) {
            self.handle_fd(ev, fd)?;
        }
        Ok(())
    }

    pub fn remove_ctlr(&mut self, ev: &mut EventLoop, devpath: &str) {
        if let Some(sub) = self.subscribers.remove(devpath) {
            ev.remove_subscriber(&sub);
        }
        if self.unpaired.remove(devpath).is_some() {
            info!("removing {} from unpaired list", devpath);
            self.clear_pending(devpath);
            return;
        }

        let slot = self.paired.iter().position(|virt| {
            virt.as_ref().map_or(false, |virt| virt.contains_phys(devpath))
        });
        if let Some(slot) = slot {
            let virt = self.paired[slot].as_mut().unwrap();
            let serial = virt
                .phys_ctlrs()
                .iter()
                .find(|p| p.devpath() == devpath)
                .map_or(false, |p| p.is_serial());
            let emptied = if virt.supports_hotplug() {
                virt.remove_phys_ctlr(devpath);
                virt.no_ctlrs_left()
            } else {
                // the only phys of a passthrough wrapper is gone with its
                // kernel device
                true
            };
            if emptied {
                let virt = self.paired[slot].take().unwrap();
                if serial {
                    // keep the virtual device alive for a same-MAC
                    // reconnect; its uinput fd stays subscribed
                    info!("serial controller disconnected; keeping wrapper alive");
                    self.stale.push(virt);
                } else {
                    info!("unpairing controller");
                    for fd in virt.uinput_fds() {
                        ev.remove_subscriber(&uinput_sub(fd));
                    }
                }
            }
        }
    }

    /// Route a ready fd: an unpaired controller goes through the pairing
    /// decision, a wrapped fd goes to its wrapper's relay.
    pub fn handle_fd(&mut self, ev: &mut EventLoop, fd: RawFd) -> Result<()> {
        let pending = self
            .unpaired
            .iter()
            .find(|(_, p)| p.fd() == fd)
            .map(|(k, _)| k.clone());
        if let Some(devpath) = pending {
            let (state, model) = {
                let phys = self.unpaired.get_mut(&devpath).unwrap();
                phys.handle_events();
                (phys.pairing_state(self.mapping.combined()), phys.model())
            };
            match state {
                PairingState::Lone => {
                    info!("lone controller paired");
                    self.add_passthrough(&devpath);
                }
                PairingState::Horizontal => {
                    info!("joy-con paired in horizontal mode");
                    self.add_passthrough(&devpath);
                }
                PairingState::VirtProcon => {
                    info!("virtual procon paired");
                    self.add_virt_procon(ev, &devpath)?;
                }
                PairingState::Waiting => {
                    if model == Model::LeftJoycon {
                        if self.left.is_none() {
                            info!("found left");
                            self.left = Some(devpath);
                        }
                    } else if self.right.is_none() {
                        info!("found right");
                        self.right = Some(devpath);
                    }
                    if self.left.is_some() && self.right.is_some() {
                        self.add_combined(ev)?;
                    }
                }
                PairingState::Pairing => {
                    self.clear_pending(&devpath);
                }
            }
        }

        for virt in self.paired.iter_mut().flatten() {
            if virt.contains_fd(fd) {
                virt.handle_events(fd);
                return Ok(());
            }
        }
        for virt in self.stale.iter_mut() {
            if virt.contains_fd(fd) {
                virt.handle_events(fd);
                return Ok(());
            }
        }
        Ok(())
    }

    fn add_passthrough(&mut self, devpath: &str) {
        let phys = self.unpaired.remove(devpath).unwrap();
        self.clear_pending(devpath);
        let slot = self.next_slot();
        phys.set_player_leds_to_player(player_for_slot(slot));
        self.place_at(slot, Box::new(VirtCtlrPassthrough::new(phys)));
    }

    fn add_virt_procon(&mut self, ev: &mut EventLoop, devpath: &str) -> Result<()> {
        let phys = self.unpaired.remove(devpath).unwrap();
        self.clear_pending(devpath);
        let slot = self.next_slot();
        let player = player_for_slot(slot);
        phys.set_player_leds_to_player(player);
        let virt = VirtCtlrPro::new(phys, self.mapping.clone(), self.tuning)?;
        for fd in virt.uinput_fds() {
            ev.add_subscriber(&uinput_sub(fd));
        }
        virt.set_player_leds_to_player(player);
        self.place_at(slot, Box::new(virt));
        Ok(())
    }

    fn add_combined(&mut self, ev: &mut EventLoop) -> Result<()> {
        let left_devpath = self.left.take().unwrap();
        let right_devpath = self.right.take().unwrap();
        let left = self.unpaired.remove(&left_devpath).unwrap();
        let right = self.unpaired.remove(&right_devpath).unwrap();

        info!("creating combined joy-con input");
        let slot = self.next_slot();
        let player = player_for_slot(slot);
        left.set_player_leds_to_player(player);
        right.set_player_leds_to_player(player);
        let virt = VirtCtlrCombined::new(left, right, self.mapping.clone(), self.tuning)?;
        for fd in virt.uinput_fds() {
            ev.add_subscriber(&uinput_sub(fd));
        }
        virt.set_player_leds_to_player(player);
        self.place_at(slot, Box::new(virt));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCtlr;

    impl VirtCtlr for FakeCtlr {
        fn handle_events(&mut self, _fd: RawFd) {}
        fn contains_fd(&self, _fd: RawFd) -> bool {
            false
        }
        fn contains_phys(&self, _devpath: &str) -> bool {
            false
        }
        fn phys_ctlrs(&self) -> Vec<&PhysCtlr> {
            Vec::new()
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
        fn mac_belongs(&self, _mac: &str) -> bool {
            false
        }
        fn add_phys_ctlr(&mut self, _phys: PhysCtlr) {}
        fn remove_phys_ctlr(&mut self, _devpath: &str) -> Option<PhysCtlr> {
            None
        }
        fn set_player_leds_to_player(&self, _player: usize) -> bool {
            true
        }
    }

    fn mgr() -> CtlrMgr {
        let mapping = Arc::new(Mapping::new(
            &::config::Settings::default(),
            ::config::default_layout(),
        ));
        CtlrMgr::new(mapping, MouseTuning::from(&::config::Settings::default()))
    }

    #[test]
    fn slots_fill_lowest_first() {
        let mut m = mgr();
        assert_eq!(m.next_slot(), 0);
        m.place_at(0, Box::new(FakeCtlr));
        assert_eq!(m.next_slot(), 1);
        m.place_at(1, Box::new(FakeCtlr));
        // free the first slot; it must be reused before appending
        m.paired[0] = None;
        assert_eq!(m.next_slot(), 0);
        m.place_at(0, Box::new(FakeCtlr));
        assert_eq!(m.next_slot(), 2);
    }

    #[test]
    fn slot_player_pattern_wraps_after_four() {
        assert_eq!(player_for_slot(0), 1);
        assert_eq!(player_for_slot(3), 4);
        assert_eq!(player_for_slot(4), 1);
    }

    #[test]
    fn empty_slot_scan() {
        let mut paired: Vec<Option<Box<dyn VirtCtlr>>> = Vec::new();
        assert_eq!(first_empty_slot(&paired), None);
        paired.push(Some(Box::new(FakeCtlr)));
        paired.push(None);
        paired.push(Some(Box::new(FakeCtlr)));
        assert_eq!(first_empty_slot(&paired), Some(1));
    }
}
