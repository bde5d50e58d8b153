//! Thin wrapper over the kernel evdev interface.
//!
//! A [`Device`] owns one `/dev/input/eventN` file opened non-blocking and
//! read-write (writes carry force-feedback playback events back to the
//! hardware). Capability bitmaps are snapshotted at open time with the
//! `EVIOCG*` ioctls; events are then drained with [`Device::next_event`]
//! until `EAGAIN`. If the kernel overruns its ring buffer it emits
//! `SYN_DROPPED`; this layer logs the gap and keeps draining, which is all
//! a pure relay can do — lost events cannot be recovered.

#![allow(non_camel_case_types)]

pub mod raw;

use ::anyhow::{Context, Result};
use ::bitflags::bitflags;
use ::fixedbitset::FixedBitSet;
use ::log::{debug, error};
use ::nix::errno::Errno;
use ::std::fs::{File, OpenOptions};
use ::std::os::unix::fs::OpenOptionsExt;
use ::std::os::unix::io::{AsRawFd, RawFd};
use ::std::path::Path;

use crate::codes;
pub use raw::{ff_effect, input_absinfo};

macro_rules! do_ioctl {
    ($name:ident($($arg:expr),+)) => {{
        unsafe { raw::$name($($arg,)+) }?
    }}
}

bitflags! {
    /// Event types advertised by a device (`EV_*` bits).
    pub struct Types: u32 {
        const SYNCHRONIZATION = 1 << 0x00;
        const KEY = 1 << 0x01;
        const RELATIVE = 1 << 0x02;
        const ABSOLUTE = 1 << 0x03;
        const MISC = 1 << 0x04;
        const SWITCH = 1 << 0x05;
        const LED = 1 << 0x11;
        const SOUND = 1 << 0x12;
        const REPEAT = 1 << 0x14;
        const FORCEFEEDBACK = 1 << 0x15;
    }
}

bitflags! {
    /// Device properties (`INPUT_PROP_*` bits).
    pub struct Props: u32 {
        const POINTER = 1 << 0x00;
        const DIRECT = 1 << 0x01;
        const BUTTONPAD = 1 << 0x02;
        const SEMI_MT = 1 << 0x03;
        const TOPBUTTONPAD = 1 << 0x04;
        const POINTING_STICK = 1 << 0x05;
        const ACCELEROMETER = 1 << 0x06;
    }
}

macro_rules! impl_number {
    ($($t:ident),*) => {
        $(impl $t {
            /// The event code for a bitflag with exactly one flag set.
            #[inline(always)]
            pub fn number<T: ::num::FromPrimitive>(&self) -> T {
                let val = self.bits().trailing_zeros();
                debug_assert!(self.bits() == 1 << val,
                    "{:?} ought to have only one flag set to be used with .number()", self);
                T::from_u32(val).unwrap()
            }
        })*
    }
}

impl_number!(Types, Props);

pub struct Device {
    file: File,
    ty: Types,
    id: ::libc::input_id,
    props: Props,
    key_bits: FixedBitSet,
}

impl AsRawFd for Device {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl ::std::fmt::Debug for Device {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("Device")
            .field("fd", &self.file.as_raw_fd())
            .field("vendor", &format_args!("{:#06x}", self.id.vendor))
            .field("product", &format_args!("{:#06x}", self.id.product))
            .field("ty", &self.ty)
            .field("props", &self.props)
            .finish()
    }
}

impl Device {
    pub fn open(path: impl AsRef<Path>) -> Result<Device> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(::libc::O_NONBLOCK)
            .open(path.as_ref())
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        let fd = file.as_raw_fd();

        let mut bits: u32 = 0;
        do_ioctl!(eviocgbit(fd, 0, 4, &mut bits as *mut u32 as *mut u8));
        let ty = Types::from_bits_truncate(bits);

        let mut id: ::libc::input_id = unsafe { ::std::mem::zeroed() };
        do_ioctl!(eviocgid(fd, &mut id));

        let mut prop_buf = [0u8; 4];
        do_ioctl!(eviocgprop(fd, &mut prop_buf));
        let props = Props::from_bits_truncate(u32::from_ne_bytes(prop_buf));

        let mut key_bits = FixedBitSet::with_capacity(codes::KEY_MAX as usize + 1);
        if ty.contains(Types::KEY) {
            do_ioctl!(eviocgbit(
                fd,
                Types::KEY.number(),
                (key_bits.len() / 8) as ::libc::c_int,
                key_bits.as_mut_slice().as_mut_ptr() as *mut u8
            ));
        }

        Ok(Device {
            file,
            ty,
            id,
            props,
            key_bits,
        })
    }

    pub fn input_id(&self) -> ::libc::input_id {
        self.id
    }

    pub fn properties(&self) -> Props {
        self.props
    }

    pub fn has_key(&self, code: u16) -> bool {
        self.key_bits.contains(code as usize)
    }

    /// Take exclusive ownership of the device so no other reader sees its
    /// events until it is released.
    pub fn grab(&self) -> Result<()> {
        do_ioctl!(eviocgrab(self.as_raw_fd(), 1));
        Ok(())
    }

    pub fn ungrab(&self) -> Result<()> {
        do_ioctl!(eviocgrab(self.as_raw_fd(), 0));
        Ok(())
    }

    /// Pull the next queued event. Returns `None` once the queue is drained
    /// or on a read failure (which is logged; a vanished device surfaces as
    /// `ENODEV` here and is handled by the hotplug path).
    pub fn next_event(&mut self) -> Option<::libc::input_event> {
        let mut ev: ::libc::input_event = unsafe { ::std::mem::zeroed() };
        let buf = unsafe {
            ::std::slice::from_raw_parts_mut(
                &mut ev as *mut _ as *mut u8,
                ::std::mem::size_of::<::libc::input_event>(),
            )
        };
        match ::nix::unistd::read(self.as_raw_fd(), buf) {
            Ok(n) if n == buf.len() => {
                if ev.type_ == codes::EV_SYN && ev.code == codes::SYN_DROPPED {
                    debug!("evdev fd={} dropped events, resyncing", self.as_raw_fd());
                }
                Some(ev)
            }
            Ok(0) => None,
            Ok(n) => {
                error!("short evdev read of {} bytes", n);
                None
            }
            Err(e) if e.as_errno() == Some(Errno::EAGAIN) => None,
            Err(e) => {
                error!("failed to read evdev fd={}: {}", self.as_raw_fd(), e);
                None
            }
        }
    }

    /// Upload or update a force-feedback effect. On success the kernel has
    /// stored the assigned effect id back into `effect.id`.
    pub fn upload_effect(&self, effect: &mut ff_effect) -> ::nix::Result<i32> {
        unsafe { raw::eviocsff(self.as_raw_fd(), effect) }
    }

    pub fn erase_effect(&self, id: i16) -> ::nix::Result<i32> {
        unsafe { raw::eviocrmff(self.as_raw_fd(), id as ::libc::c_ulong) }
    }

    /// Write one event to the device (force-feedback playback).
    pub fn write_event(&self, type_: u16, code: u16, value: i32) -> ::nix::Result<usize> {
        write_input_event(self.as_raw_fd(), type_, code, value)
    }
}

/// Serialize one `input_event` onto an evdev or uinput fd.
pub fn write_input_event(fd: RawFd, type_: u16, code: u16, value: i32) -> ::nix::Result<usize> {
    let ev = ::libc::input_event {
        time: ::libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        type_,
        code,
        value,
    };
    let buf = unsafe {
        ::std::slice::from_raw_parts(
            &ev as *const _ as *const u8,
            ::std::mem::size_of::<::libc::input_event>(),
        )
    };
    ::nix::unistd::write(fd, buf)
}
