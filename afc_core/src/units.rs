//! Integer unit helpers.
//!
//! The controller works in the pack's native integer units so the per-cycle
//! path stays deterministic:
//!
//! - current: mA (`i32` measured, `u32` commanded)
//! - cell voltage: mV (`u16`)
//! - temperature: 0.1 °C, suffix `_dc` (`i16`, 300 = 30.0 °C)
//! - SOC: 0.01 %, suffix `_cpct` (`u16`, 10000 = 100 %)

/// SOC value for a full pack.
pub const SOC_FULL_CPCT: u16 = 10_000;

/// Quantize °C to 0.1 °C, rounding to nearest and clamping to the `i16` range.
/// Non-finite values map to 0.
#[inline]
pub fn celsius_to_dc(c: f32) -> i16 {
    if !c.is_finite() {
        return 0;
    }
    // float -> int casts saturate
    (c * 10.0).round() as i16
}

#[inline]
pub fn dc_to_celsius(t_dc: i16) -> f32 {
    f32::from(t_dc) / 10.0
}

/// Quantize a percentage to 0.01 %, clamped to `0..=SOC_FULL_CPCT`.
#[inline]
pub fn pct_to_cpct(pct: f32) -> u16 {
    if !pct.is_finite() {
        return 0;
    }
    ((pct * 100.0).round() as u16).min(SOC_FULL_CPCT)
}

/// Round to the nearest `u16`, saturating. NaN maps to 0.
#[inline]
pub fn saturate_u16(x: f32) -> u16 {
    x.round() as u16
}

/// Charging component of a signed pack current (discharge reads as 0).
#[inline]
pub fn charge_ma(pack_ma: i32) -> u32 {
    pack_ma.max(0).unsigned_abs()
}

/// `value * pct / 100`, rounding down. `pct` above 100 is treated as 100.
#[inline]
pub fn scale_pct(value: u32, pct: u8) -> u32 {
    let scaled = u64::from(value) * u64::from(pct.min(100)) / 100;
    // pct <= 100 keeps the product within u32
    scaled as u32
}

/// Difference `a - b` in 0.1 °C without `i16` overflow.
#[inline]
pub fn temp_delta_dc(a: i16, b: i16) -> i32 {
    i32::from(a) - i32::from(b)
}
