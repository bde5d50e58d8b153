//! Controller discovery: an initial `/dev/input` sweep plus a kernel
//! uevent netlink socket for hotplug. Disconnect uevents can arrive late,
//! so every wakeup first probes the remembered device nodes for silent
//! removals before parsing the datagram.

use ::anyhow::{Context, Result};
use ::log::{error, info, warn};
use ::nix::sys::socket::{
    bind, recv, socket, AddressFamily, MsgFlags, NetlinkAddr, SockAddr, SockFlag, SockProtocol,
    SockType,
};
use ::std::collections::HashMap;
use ::std::fs;
use ::std::os::unix::io::RawFd;
use ::std::path::Path;
use ::std::thread::sleep;
use ::std::time::Duration;

use crate::ctlr_mgr::CtlrMgr;
use crate::evdev::{Device, Props};
use crate::event_loop::{EventLoop, Subscriber};

/// Give the kernel driver time to finish populating sysfs after a uevent.
const SYSFS_SETTLE: Duration = Duration::from_millis(100);

const NINTENDO_VENDOR: u16 = 0x057e;

fn known_product(product: u16) -> bool {
    matches!(
        product,
        0x2006 | 0x2007 | 0x2009 | 0x2017 | 0x200e | 0xf123
    )
}

/// A uevent datagram reduced to what the detector acts on.
#[derive(Debug, PartialEq, Eq)]
pub struct Uevent {
    pub add: bool,
    pub devnode: String,
}

/// Parse a kobject-uevent datagram: NUL-separated `KEY=VALUE` records after
/// the `action@devpath` header. Returns `None` for anything that is not an
/// input add/remove with an event or hid device node.
pub fn parse_uevent(buf: &[u8]) -> Option<Uevent> {
    let mut action = None;
    let mut subsystem = None;
    let mut devpath = None;
    let mut devname = None;

    for record in buf.split(|&b| b == 0) {
        let record = match ::std::str::from_utf8(record) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let mut kv = record.splitn(2, '=');
        let (key, value) = match (kv.next(), kv.next()) {
            (Some(k), Some(v)) => (k, v),
            _ => continue,
        };
        match key {
            "ACTION" => action = Some(value.to_owned()),
            "SUBSYSTEM" => subsystem = Some(value.to_owned()),
            "DEVPATH" => devpath = Some(value.to_owned()),
            "DEVNAME" => {
                devname = Some(if value.starts_with("/dev/") {
                    value.to_owned()
                } else {
                    format!("/dev/{}", value)
                })
            }
            _ => {}
        }
    }

    let add = match action.as_deref() {
        Some("add") => true,
        Some("remove") => false,
        _ => return None,
    };
    if subsystem.as_deref() != Some("input") {
        return None;
    }
    if devpath.map_or(true, |p| p.is_empty()) {
        return None;
    }
    let devnode = devname?;
    let basename = devnode.rsplit('/').next().unwrap_or("");
    if !basename.contains("event") && !basename.contains("hid") {
        return None;
    }
    Some(Uevent { add, devnode })
}

/// The sysfs path the rest of the daemon keys devices by.
pub fn sysfs_path_for(devnode: &str) -> String {
    let basename = devnode.rsplit('/').next().unwrap_or(devnode);
    format!("/class/input/{}/device", basename)
}

fn read_mac(sysfs_path: &str) -> String {
    fs::read_to_string(format!("/sys{}/uniq", sysfs_path))
        .map(|s| s.trim_end().to_owned())
        .unwrap_or_default()
}

/// Open the device and check that it is a Switch controller we manage.
/// The IMU subdevices the driver also exposes advertise the accelerometer
/// property and are rejected.
fn check_ctlr_attributes(devnode: &str) -> bool {
    let dev = match Device::open(devnode) {
        Ok(dev) => dev,
        Err(e) => {
            error!("failed to probe {}: {}", devnode, e);
            return false;
        }
    };
    let id = dev.input_id();
    let is_accel = dev.properties().contains(Props::ACCELEROMETER);
    info!(
        "input device connected vid: {:#06x} pid: {:#06x} accel: {}",
        id.vendor, id.product, is_accel
    );
    id.vendor == NINTENDO_VENDOR && known_product(id.product) && !is_accel
}

pub struct CtlrDetector {
    sock_fd: RawFd,
    // sysfs path -> device node, for the silent-removal sweep
    dev_map: HashMap<String, String>,
    // MAC -> sysfs path, to catch replacements before their remove uevent
    mac_map: HashMap<String, String>,
}

impl CtlrDetector {
    pub fn new(ev: &mut EventLoop, mgr: &mut CtlrMgr) -> Result<CtlrDetector> {
        let mut detector = CtlrDetector {
            sock_fd: -1,
            dev_map: HashMap::new(),
            mac_map: HashMap::new(),
        };

        // sweep whatever is already plugged in
        for entry in fs::read_dir("/dev/input").context("failed to read /dev/input")? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("event") {
                continue;
            }
            let devnode = format!("/dev/input/{}", name);
            if check_ctlr_attributes(&devnode) {
                let sysfs_path = sysfs_path_for(&devnode);
                mgr.add_ctlr(ev, &sysfs_path, &devnode)?;
                let mac = read_mac(&sysfs_path);
                info!("add controller to map: {}", sysfs_path);
                if !mac.is_empty() {
                    detector.mac_map.insert(mac, sysfs_path.clone());
                }
                detector.dev_map.insert(sysfs_path, devnode);
            }
        }

        let fd = socket(
            AddressFamily::Netlink,
            SockType::Datagram,
            SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )
        .context("failed to create uevent socket")?;
        bind(
            fd,
            &SockAddr::Netlink(NetlinkAddr::new(::std::process::id(), u32::MAX)),
        )
        .context("failed to bind uevent socket")?;
        detector.sock_fd = fd;
        ev.add_subscriber(&Subscriber::new("uevent", vec![fd]));

        Ok(detector)
    }

    pub fn uevent_fd(&self) -> RawFd {
        self.sock_fd
    }

    fn forget(&mut self, sysfs_path: &str) {
        self.dev_map.remove(sysfs_path);
        self.mac_map.retain(|_, p| p != sysfs_path);
    }

    /// Double-check every remembered controller is still there; disconnect
    /// uevents are not delivered promptly enough to rely on.
    fn scan_removed_ctlrs(&mut self, ev: &mut EventLoop, mgr: &mut CtlrMgr) {
        let gone: Vec<String> = self
            .dev_map
            .iter()
            .filter(|(_, devnode)| !Path::new(devnode).exists())
            .map(|(sysfs_path, _)| sysfs_path.clone())
            .collect();
        for sysfs_path in gone {
            info!("controller {} vanished without a remove event", sysfs_path);
            mgr.remove_ctlr(ev, &sysfs_path);
            self.forget(&sysfs_path);
        }
    }

    pub fn handle_events(&mut self, ev: &mut EventLoop, mgr: &mut CtlrMgr) -> Result<()> {
        self.scan_removed_ctlrs(ev, mgr);

        let mut buf = [0u8; 8192];
        let len = match recv(self.sock_fd, &mut buf, MsgFlags::empty()) {
            Ok(len) => len,
            Err(e) => {
                warn!("failed to receive uevent: {}", e);
                return Ok(());
            }
        };

        let uevent = match parse_uevent(&buf[..len]) {
            Some(uevent) => uevent,
            None => return Ok(()),
        };

        let sysfs_path = sysfs_path_for(&uevent.devnode);
        sleep(SYSFS_SETTLE);

        // a known MAC on a new path is the same controller on a different
        // transport; drop the old identity before anything else
        let mac = read_mac(&sysfs_path);
        if !mac.is_empty() {
            if let Some(old_path) = self.mac_map.get(&mac).cloned() {
                if old_path != sysfs_path {
                    mgr.remove_ctlr(ev, &old_path);
                    self.forget(&old_path);
                }
            }
        }

        if !uevent.add {
            info!("remove controller from map: {}", sysfs_path);
            self.forget(&sysfs_path);
            mgr.remove_ctlr(ev, &sysfs_path);
            return Ok(());
        }

        if check_ctlr_attributes(&uevent.devnode) {
            mgr.add_ctlr(ev, &sysfs_path, &uevent.devnode)?;
            info!("add controller to map: {}", sysfs_path);
            if !mac.is_empty() {
                self.mac_map.insert(mac, sysfs_path.clone());
            }
            self.dev_map.insert(sysfs_path, uevent.devnode);
        }
        Ok(())
    }
}

impl Drop for CtlrDetector {
    fn drop(&mut self) {
        if self.sock_fd >= 0 {
            let _ = ::nix::unistd::close(self.sock_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(records: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for r in records {
            buf.extend_from_slice(r.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn add_event_is_accepted() {
        let buf = datagram(&[
            "add@/devices/virtual/input/input12/event12",
            "ACTION=add",
            "DEVPATH=/devices/virtual/input/input12/event12",
            "SUBSYSTEM=input",
            "DEVNAME=input/event12",
        ]);
        assert_eq!(
            parse_uevent(&buf),
            Some(Uevent {
                add: true,
                devnode: "/dev/input/event12".to_owned()
            })
        );
    }

    #[test]
    fn remove_event_is_accepted() {
        let buf = datagram(&[
            "remove@/devices/foo/event3",
            "ACTION=remove",
            "DEVPATH=/devices/foo/event3",
            "SUBSYSTEM=input",
            "DEVNAME=/dev/input/event3",
        ]);
        let uevent = parse_uevent(&buf).unwrap();
        assert!(!uevent.add);
        assert_eq!(uevent.devnode, "/dev/input/event3");
    }

    #[test]
    fn non_input_subsystem_is_skipped() {
        let buf = datagram(&[
            "ACTION=add",
            "DEVPATH=/devices/foo",
            "SUBSYSTEM=hidraw",
            "DEVNAME=hidraw0",
        ]);
        assert_eq!(parse_uevent(&buf), None);
    }

    #[test]
    fn non_event_node_is_skipped() {
        let buf = datagram(&[
            "ACTION=add",
            "DEVPATH=/devices/foo",
            "SUBSYSTEM=input",
            "DEVNAME=input/js0",
        ]);
        assert_eq!(parse_uevent(&buf), None);
    }

    #[test]
    fn hid_node_is_accepted() {
        let buf = datagram(&[
            "ACTION=add",
            "DEVPATH=/devices/foo",
            "SUBSYSTEM=input",
            "DEVNAME=input/hiddev0",
        ]);
        assert!(parse_uevent(&buf).is_some());
    }

    #[test]
    fn bind_action_is_skipped() {
        let buf = datagram(&[
            "ACTION=bind",
            "DEVPATH=/devices/foo",
            "SUBSYSTEM=input",
            "DEVNAME=input/event1",
        ]);
        assert_eq!(parse_uevent(&buf), None);
    }

    #[test]
    fn missing_devname_is_skipped() {
        let buf = datagram(&["ACTION=add", "DEVPATH=/devices/foo", "SUBSYSTEM=input"]);
        assert_eq!(parse_uevent(&buf), None);
    }

    #[test]
    fn sysfs_path_from_devnode() {
        assert_eq!(
            sysfs_path_for("/dev/input/event12"),
            "/class/input/event12/device"
        );
    }
}
