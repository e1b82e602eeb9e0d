use bitflags::bitflags;
use glam::Vec3;

use super::codec::MessageWriter;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const ATTACK = 1 << 0;
        const USE = 1 << 1;
        const ANY = 1 << 7;
    }
}

/// Per-tick player input.
///
/// Angles are in degrees; movement is in units per second and saturates at
/// the `i16` range on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UserCommand {
    pub msec: u8,
    pub buttons: Buttons,
    pub angles: Vec3,
    pub forward_move: f32,
    pub side_move: f32,
    pub up_move: f32,
    pub impulse: u8,
    pub light_level: u8,
}

impl UserCommand {
    pub const ENCODED_LEN: usize = 16;

    pub fn new(msec: u8) -> Self {
        Self {
            msec,
            ..Default::default()
        }
    }

    pub fn with_angles(mut self, angles: Vec3) -> Self {
        self.angles = angles;
        self
    }

    pub fn with_movement(mut self, forward: f32, side: f32, up: f32) -> Self {
        self.forward_move = forward;
        self.side_move = side;
        self.up_move = up;
        self
    }

    pub fn set_button(&mut self, button: Buttons, pressed: bool) {
        self.buttons.set(button, pressed);
        self.buttons
            .set(Buttons::ANY, !(self.buttons - Buttons::ANY).is_empty());
    }

    pub fn write(&self, writer: &mut MessageWriter) {
        writer
            .write_u8(self.msec)
            .write_u8(self.buttons.bits())
            .write_i16(angle_to_short(self.angles.x))
            .write_i16(angle_to_short(self.angles.y))
            .write_i16(angle_to_short(self.angles.z))
            .write_i16(saturate(self.forward_move))
            .write_i16(saturate(self.side_move))
            .write_i16(saturate(self.up_move))
            .write_u8(self.impulse)
            .write_u8(self.light_level);
    }
}

fn angle_to_short(degrees: f32) -> i16 {
    ((degrees * 65536.0 / 360.0) as i32 & 0xFFFF) as u16 as i16
}

fn saturate(value: f32) -> i16 {
    value.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
