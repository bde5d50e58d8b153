//! Event translation between a physical controller and its virtual
//! counterpart, shared by the Pro-like and combined wrappers.
//!
//! Phys→virt rewrites key events against the live layout, emulates the
//! D-pad hat and the analog triggers, and feeds the virtual mouse.
//! Virt→phys proxies force-feedback uploads with effect-id translation:
//! applications talk to the virtual device with ids the uinput core
//! assigned, while each physical controller has its own kernel-assigned id
//! for the same effect.

use ::config::Mapping;
use ::log::{debug, error, info, warn};
use ::std::collections::HashMap;

use crate::codes;
use crate::evdev::ff_effect;
use crate::phys_ctlr::PhysCtlr;
use crate::uinput::{uinput_ff_erase, uinput_ff_upload, UinputDevice};
use crate::virt_mouse::VirtMouse;

/// The emulated analog axis for a trigger button, if any.
pub fn analog_axis_for_trigger(code: u16) -> Option<u16> {
    match code {
        codes::BTN_TL2 => Some(codes::ABS_Z),
        codes::BTN_TR2 => Some(codes::ABS_RZ),
        _ => None,
    }
}

/// The hat axis and value for a D-pad button, if any. Up and left are the
/// negative directions.
pub fn hat_for_dpad(code: u16, value: i32) -> Option<(u16, i32)> {
    match code {
        codes::BTN_DPAD_UP => Some((codes::ABS_HAT0Y, -value)),
        codes::BTN_DPAD_DOWN => Some((codes::ABS_HAT0Y, value)),
        codes::BTN_DPAD_LEFT => Some((codes::ABS_HAT0X, -value)),
        codes::BTN_DPAD_RIGHT => Some((codes::ABS_HAT0X, value)),
        _ => None,
    }
}

/// Translate one physical event and publish it on the virtual device.
pub fn relay_phys_event(
    uidev: &UinputDevice,
    mouse: &VirtMouse,
    mapping: &Mapping,
    ev: &::libc::input_event,
) {
    if mapping.rsmouse() {
        mouse.relay_mouse_event(ev);
    }

    if mapping.analog() && ev.type_ == codes::EV_KEY {
        if let Some(axis) = analog_axis_for_trigger(ev.code) {
            uidev.write_event(codes::EV_ABS, axis, ev.value);
            return;
        }
    }

    // the capture button toggles the mouse mode in-band
    if ev.type_ == codes::EV_KEY && ev.code == codes::BTN_Z && ev.value != 0 {
        let now = mapping.toggle_rsmouse();
        info!("rsmouse toggled to {}", now);
    }

    if ev.type_ == codes::EV_KEY {
        if let Some(to) = mapping.lookup(ev.code as u32) {
            uidev.write_event(codes::EV_KEY, to as u16, ev.value);
            return;
        }
        if let Some((axis, value)) = hat_for_dpad(ev.code, ev.value) {
            uidev.write_event(codes::EV_ABS, axis, value);
            return;
        }
    }

    uidev.write_event(ev.type_, ev.code, ev.value);
}

/// The virtual→physical effect table: virtual effect id → one uploaded
/// effect per member controller, in member order at upload time.
#[derive(Default)]
pub struct FfProxy {
    effects: HashMap<i16, Vec<ff_effect>>,
}

impl FfProxy {
    pub fn new() -> FfProxy {
        FfProxy::default()
    }

    fn handle_upload(&mut self, uidev: &UinputDevice, phys: &[&PhysCtlr], request_id: u32) {
        let mut upload = uinput_ff_upload::default();
        upload.request_id = request_id;
        if let Err(e) = uidev.begin_ff_upload(&mut upload) {
            error!("failed to get uinput_ff_upload: {}", e);
            return;
        }

        // The id in upload.effect is the client-visible virtual id and must
        // survive untouched; only the per-member copies get physical ids.
        let virt_id = upload.effect.id;
        let prev = self.effects.get(&virt_id).cloned();
        let mut uploaded = Vec::with_capacity(phys.len());
        upload.retval = 0;
        if phys.is_empty() {
            upload.retval = ::libc::ENODEV;
        }
        for (i, p) in phys.iter().enumerate() {
            let mut effect = upload.effect;
            effect.id = prev
                .as_ref()
                .and_then(|v| v.get(i))
                .map_or(-1, |e| e.id);
            match p.upload_effect(&mut effect) {
                Ok(_) => uploaded.push(effect),
                Err(e) => {
                    upload.retval = e.as_errno().map_or(::libc::EIO, |err| err as i32);
                }
            }
        }

        if upload.retval == 0 {
            self.effects.insert(virt_id, uploaded);
        } else {
            error!(
                "UI_FF_UPLOAD of effect {} failed: {}",
                virt_id,
                ::nix::errno::Errno::from_i32(upload.retval)
            );
        }

        if let Err(e) = uidev.end_ff_upload(&upload) {
            error!("failed to end uinput_ff_upload: {}", e);
        }
    }

    fn handle_erase(&mut self, uidev: &UinputDevice, phys: &[&PhysCtlr], request_id: u32) {
        let mut erase = uinput_ff_erase::default();
        erase.request_id = request_id;
        if let Err(e) = uidev.begin_ff_erase(&mut erase) {
            error!("failed to get uinput_ff_erase: {}", e);
            return;
        }

        erase.retval = 0;
        match self.effects.remove(&(erase.effect_id as i16)) {
            Some(uploaded) => {
                for (p, effect) in phys.iter().zip(uploaded.iter()) {
                    if let Err(e) = p.erase_effect(effect.id) {
                        error!("UI_FF_ERASE failed: {}", e);
                        erase.retval = e.as_errno().map_or(::libc::EIO, |err| err as i32);
                    }
                }
            }
            None => warn!("effect_id {} not in effect table", erase.effect_id),
        }

        if let Err(e) = uidev.end_ff_erase(&erase) {
            error!("failed to end uinput_ff_erase: {}", e);
        }
    }

    fn forward_playback(&self, phys: &[&PhysCtlr], code: u16, value: i32) {
        if code >= codes::FF_GAIN {
            // command codes are not per-effect ids, pass through
            for p in phys {
                p.write_event(codes::EV_FF, code, value);
            }
            return;
        }
        match self.effects.get(&(code as i16)) {
            Some(uploaded) => {
                for (p, effect) in phys.iter().zip(uploaded.iter()) {
                    p.write_event(codes::EV_FF, effect.id as u16, value);
                }
            }
            None => {
                error!("ff effect with id={} is not in effect table", code);
                for p in phys {
                    p.write_event(codes::EV_FF, code, value);
                }
            }
        }
    }
}

/// Drain everything applications queued towards the virtual device and act
/// on it: effect playback, effect upload/erase, LED echoes.
pub fn handle_uinput_events(uidev: &UinputDevice, phys: &[&PhysCtlr], proxy: &mut FfProxy) {
    while let Some(ev) = uidev.next_event() {
        match ev.type_ {
            codes::EV_FF => proxy.forward_playback(phys, ev.code, ev.value),
            codes::EV_UINPUT => match ev.code {
                codes::UI_FF_UPLOAD => proxy.handle_upload(uidev, phys, ev.value as u32),
                codes::UI_FF_ERASE => proxy.handle_erase(uidev, phys, ev.value as u32),
                code => error!("unhandled EV_UINPUT code={}", code),
            },
            codes::EV_LED => {
                // keep the client-visible LED state inverted back on; the
                // pairing manager is the authoritative source
                if ev.value == 0 {
                    uidev.write_event(codes::EV_LED, ev.code, 1);
                }
            }
            type_ => debug!("unhandled uinput type={}", type_),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpad_maps_to_hat() {
        assert_eq!(hat_for_dpad(codes::BTN_DPAD_UP, 1), Some((codes::ABS_HAT0Y, -1)));
        assert_eq!(hat_for_dpad(codes::BTN_DPAD_DOWN, 1), Some((codes::ABS_HAT0Y, 1)));
        assert_eq!(hat_for_dpad(codes::BTN_DPAD_LEFT, 1), Some((codes::ABS_HAT0X, -1)));
        assert_eq!(hat_for_dpad(codes::BTN_DPAD_RIGHT, 1), Some((codes::ABS_HAT0X, 1)));
        assert_eq!(hat_for_dpad(codes::BTN_SOUTH, 1), None);
    }

    #[test]
    fn dpad_release_recenters_hat() {
        assert_eq!(hat_for_dpad(codes::BTN_DPAD_UP, 0), Some((codes::ABS_HAT0Y, 0)));
        assert_eq!(hat_for_dpad(codes::BTN_DPAD_RIGHT, 0), Some((codes::ABS_HAT0X, 0)));
    }

    #[test]
    fn triggers_map_to_analog_axes() {
        assert_eq!(analog_axis_for_trigger(codes::BTN_TL2), Some(codes::ABS_Z));
        assert_eq!(analog_axis_for_trigger(codes::BTN_TR2), Some(codes::ABS_RZ));
        assert_eq!(analog_axis_for_trigger(codes::BTN_TL), None);
    }
}
