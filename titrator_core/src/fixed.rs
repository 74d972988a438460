//! One-byte 4.4 encoding for persisted dKH values.
//!
//! High nibble holds the integer part, low nibble the first decimal digit.
//! Values outside 0.0..=15.9 saturate rather than wrap, so a pathological
//! reading stores as the nearest representable value instead of aliasing to
//! a plausible one.

pub const MAX_ENCODABLE_DKH: f32 = 15.9;

pub fn encode_dkh(dkh: f32) -> u8 {
    if !dkh.is_finite() || dkh <= 0.0 {
        return 0;
    }
    let tenths = ((dkh * 10.0).round() as u32).min(159);
    let whole = tenths / 10;
    let frac = tenths % 10;
    ((whole << 4) | frac) as u8
}

pub fn decode_dkh(byte: u8) -> f32 {
    let whole = u32::from(byte >> 4);
    let frac = u32::from(byte & 0x0F);
    whole as f32 + frac as f32 / 10.0
}
