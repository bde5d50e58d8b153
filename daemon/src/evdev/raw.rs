use ::nix::{
    convert_ioctl_res, ioctl_read, ioctl_read_buf, ioctl_write_int, request_code_read,
    request_code_write,
};

ioctl_read!(eviocgid, b'E', 0x02, ::libc::input_id);
ioctl_read_buf!(eviocgprop, b'E', 0x09, u8);
ioctl_write_int!(eviocrmff, b'E', 0x81);
ioctl_write_int!(eviocgrab, b'E', 0x90);

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct input_absinfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct ff_trigger {
    pub button: u16,
    pub interval: u16,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct ff_replay {
    pub length: u16,
    pub delay: u16,
}

/// `struct ff_effect`. The kernel-side union of per-waveform parameters is
/// carried as an opaque block; this daemon only proxies effects and never
/// interprets the payload.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct ff_effect {
    pub type_: u16,
    pub id: i16,
    pub direction: u16,
    pub trigger: ff_trigger,
    pub replay: ff_replay,
    pub u: [u64; 4],
}

impl Default for ff_effect {
    fn default() -> Self {
        unsafe { ::std::mem::zeroed() }
    }
}

pub unsafe fn eviocgbit(
    fd: ::libc::c_int,
    ev: u32,
    len: ::libc::c_int,
    buf: *mut u8,
) -> ::nix::Result<i32> {
    convert_ioctl_res!(::libc::ioctl(
        fd,
        request_code_read!(b'E', 0x20 + ev, len) as ::libc::c_ulong,
        buf
    ))
}

/// `EVIOCSFF` is declared write-only, but the kernel stores the assigned
/// effect id back through the pointer, so it takes `*mut`.
pub unsafe fn eviocsff(fd: ::libc::c_int, effect: *mut ff_effect) -> ::nix::Result<i32> {
    convert_ioctl_res!(::libc::ioctl(
        fd,
        request_code_write!(b'E', 0x80, ::std::mem::size_of::<ff_effect>()) as ::libc::c_ulong,
        effect
    ))
}
