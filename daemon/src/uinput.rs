//! User-space input device creation (`/dev/uinput`), including the
//! force-feedback request plumbing that lets applications upload rumble
//! effects to a virtual device and have them land on real hardware.

#![allow(non_camel_case_types)]

use ::anyhow::{anyhow, Context, Result};
use ::log::error;
use ::nix::errno::Errno;
use ::nix::{ioctl_none, ioctl_readwrite, ioctl_write_int, ioctl_write_ptr};
use ::std::fs::File;
use ::std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use crate::codes;
use crate::evdev::{self, input_absinfo};

pub const UINPUT_MAX_NAME_SIZE: usize = 80;

#[repr(C)]
#[derive(Clone)]
pub struct uinput_setup {
    pub id: ::libc::input_id,
    pub name: [u8; UINPUT_MAX_NAME_SIZE],
    pub ff_effects_max: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct uinput_abs_setup {
    pub code: u16,
    pub absinfo: input_absinfo,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct uinput_ff_upload {
    pub request_id: u32,
    pub retval: i32,
    pub effect: evdev::ff_effect,
    pub old: evdev::ff_effect,
}

impl Default for uinput_ff_upload {
    fn default() -> Self {
        unsafe { ::std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct uinput_ff_erase {
    pub request_id: u32,
    pub retval: i32,
    pub effect_id: u32,
}

ioctl_none!(ui_dev_create, b'U', 1);
ioctl_none!(ui_dev_destroy, b'U', 2);
ioctl_write_ptr!(ui_dev_setup, b'U', 3, uinput_setup);
ioctl_write_ptr!(ui_abs_setup, b'U', 4, uinput_abs_setup);

ioctl_write_int!(ui_set_evbit, b'U', 100);
ioctl_write_int!(ui_set_keybit, b'U', 101);
ioctl_write_int!(ui_set_relbit, b'U', 102);
ioctl_write_int!(ui_set_absbit, b'U', 103);
ioctl_write_int!(ui_set_ledbit, b'U', 105);
ioctl_write_int!(ui_set_ffbit, b'U', 107);
ioctl_write_int!(ui_set_propbit, b'U', 110);

ioctl_readwrite!(ui_begin_ff_upload, b'U', 200, uinput_ff_upload);
ioctl_write_ptr!(ui_end_ff_upload, b'U', 201, uinput_ff_upload);
ioctl_readwrite!(ui_begin_ff_erase, b'U', 202, uinput_ff_erase);
ioctl_write_ptr!(ui_end_ff_erase, b'U', 203, uinput_ff_erase);

/// Accumulates the capability set for a device, then creates it.
pub struct Builder {
    name: String,
    vendor: u16,
    product: u16,
    keys: Vec<u16>,
    rels: Vec<u16>,
    abs: Vec<uinput_abs_setup>,
    leds: Vec<u16>,
    ff: Vec<u16>,
    props: Vec<u16>,
    ff_effects_max: u32,
}

impl Builder {
    pub fn new(name: &str, vendor: u16, product: u16) -> Builder {
        Builder {
            name: name.to_owned(),
            vendor,
            product,
            keys: Vec::new(),
            rels: Vec::new(),
            abs: Vec::new(),
            leds: Vec::new(),
            ff: Vec::new(),
            props: Vec::new(),
            ff_effects_max: 0,
        }
    }

    pub fn keys(mut self, codes: &[u16]) -> Builder {
        self.keys.extend_from_slice(codes);
        self
    }

    pub fn rels(mut self, codes: &[u16]) -> Builder {
        self.rels.extend_from_slice(codes);
        self
    }

    pub fn abs(mut self, code: u16, minimum: i32, maximum: i32, fuzz: i32, flat: i32) -> Builder {
        self.abs.push(uinput_abs_setup {
            code,
            absinfo: input_absinfo {
                value: 0,
                minimum,
                maximum,
                fuzz,
                flat,
                resolution: 0,
            },
        });
        self
    }

    pub fn leds(mut self, codes: &[u16]) -> Builder {
        self.leds.extend_from_slice(codes);
        self
    }

    pub fn ff(mut self, codes: &[u16], effects_max: u32) -> Builder {
        self.ff.extend_from_slice(codes);
        self.ff_effects_max = effects_max;
        self
    }

    pub fn prop(mut self, prop: u16) -> Builder {
        self.props.push(prop);
        self
    }

    pub fn create(self) -> Result<UinputDevice> {
        use ::nix::fcntl::OFlag;
        use ::nix::sys::stat::Mode;

        let name_bytes = self.name.as_bytes();
        if name_bytes.len() >= UINPUT_MAX_NAME_SIZE {
            return Err(anyhow!("device name {:?} is too long", self.name));
        }

        let fd = ::nix::fcntl::open(
            "/dev/uinput",
            OFlag::O_RDWR | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .context("failed to open /dev/uinput")?;
        // Take ownership immediately so every early return closes the fd.
        let file = unsafe { File::from_raw_fd(fd) };

        unsafe {
            if !self.keys.is_empty() {
                ui_set_evbit(fd, codes::EV_KEY as _)?;
                for &key in &self.keys {
                    ui_set_keybit(fd, key as _)?;
                }
            }
            if !self.rels.is_empty() {
                ui_set_evbit(fd, codes::EV_REL as _)?;
                for &rel in &self.rels {
                    ui_set_relbit(fd, rel as _)?;
                }
            }
            if !self.abs.is_empty() {
                ui_set_evbit(fd, codes::EV_ABS as _)?;
                for setup in &self.abs {
                    ui_set_absbit(fd, setup.code as _)?;
                    ui_abs_setup(fd, setup)?;
                }
            }
            if !self.leds.is_empty() {
                ui_set_evbit(fd, codes::EV_LED as _)?;
                for &led in &self.leds {
                    ui_set_ledbit(fd, led as _)?;
                }
            }
            if !self.ff.is_empty() {
                ui_set_evbit(fd, codes::EV_FF as _)?;
                for &ff in &self.ff {
                    ui_set_ffbit(fd, ff as _)?;
                }
            }
            for &prop in &self.props {
                ui_set_propbit(fd, prop as _)?;
            }

            let mut usetup = uinput_setup {
                id: ::libc::input_id {
                    bustype: codes::BUS_USB,
                    vendor: self.vendor,
                    product: self.product,
                    version: 0,
                },
                name: [0; UINPUT_MAX_NAME_SIZE],
                ff_effects_max: self.ff_effects_max,
            };
            usetup.name[..name_bytes.len()].copy_from_slice(name_bytes);
            ui_dev_setup(fd, &usetup)?;
            ui_dev_create(fd)?;
        }

        Ok(UinputDevice { file })
    }
}

/// A created user-space input device. Reads drain force-feedback and LED
/// requests from applications; writes publish events to them.
pub struct UinputDevice {
    file: File,
}

impl AsRawFd for UinputDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl UinputDevice {
    /// Publish one event. Failures are logged, not propagated: a relay has
    /// nothing useful to do with a transient uinput write error.
    pub fn write_event(&self, type_: u16, code: u16, value: i32) {
        if let Err(e) = evdev::write_input_event(self.as_raw_fd(), type_, code, value) {
            error!(
                "failed to write event ({}, {}, {}) to uinput fd={}: {}",
                type_,
                code,
                value,
                self.as_raw_fd(),
                e
            );
        }
    }

    /// Pull the next event queued towards this device, `None` when drained.
    pub fn next_event(&self) -> Option<::libc::input_event> {
        let mut ev: ::libc::input_event = unsafe { ::std::mem::zeroed() };
        let buf = unsafe {
            ::std::slice::from_raw_parts_mut(
                &mut ev as *mut _ as *mut u8,
                ::std::mem::size_of::<::libc::input_event>(),
            )
        };
        match ::nix::unistd::read(self.as_raw_fd(), buf) {
            Ok(n) if n == buf.len() => Some(ev),
            Ok(0) => None,
            Ok(n) => {
                error!("short uinput read of {} bytes", n);
                None
            }
            Err(e) if e.as_errno() == Some(Errno::EAGAIN) => None,
            Err(e) => {
                error!("failed to read uinput fd={}: {}", self.as_raw_fd(), e);
                None
            }
        }
    }

    pub fn begin_ff_upload(&self, upload: &mut uinput_ff_upload) -> ::nix::Result<i32> {
        unsafe { ui_begin_ff_upload(self.as_raw_fd(), upload) }
    }

    pub fn end_ff_upload(&self, upload: &uinput_ff_upload) -> ::nix::Result<i32> {
        unsafe { ui_end_ff_upload(self.as_raw_fd(), upload) }
    }

    pub fn begin_ff_erase(&self, erase: &mut uinput_ff_erase) -> ::nix::Result<i32> {
        unsafe { ui_begin_ff_erase(self.as_raw_fd(), erase) }
    }

    pub fn end_ff_erase(&self, erase: &uinput_ff_erase) -> ::nix::Result<i32> {
        unsafe { ui_end_ff_erase(self.as_raw_fd(), erase) }
    }
}

impl Drop for UinputDevice {
    fn drop(&mut self) {
        if let Err(e) = unsafe { ui_dev_destroy(self.as_raw_fd()) } {
            error!("failed to destroy uinput device: {}", e);
        }
    }
}
