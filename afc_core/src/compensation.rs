//! Temperature and current compensation model.
//!
//! Pure functions only. The overpotential of a cell (`V - OCV`) scales with
//! internal resistance, which depends on temperature and SOC, and with
//! current. The ratios below normalise a reading to the reference temperature
//! and a 1C current so stage thresholds can be compared across conditions.

use crate::params::{Coefficients, TempLimits};
use crate::units::{SOC_FULL_CPCT, charge_ma, saturate_u16, temp_delta_dc};

/// Upper bound of `current_ratio`.
pub const CURRENT_RATIO_MAX: f32 = 2.0;
/// Bounds of `temperature_ratio`.
pub const TEMP_RATIO_MIN: f32 = 0.05;
pub const TEMP_RATIO_MAX: f32 = 100.0;
/// Below this `tr * cr` product the overpotential is not normalised.
pub const MIN_COMPENSATION_PRODUCT: f32 = 0.1;

/// Dimensionless load ratio `(g + h * soc) * I / I_rated`, clamped to
/// `[0, CURRENT_RATIO_MAX]`. Discharge and a zero rating give 0.
pub fn current_ratio(coeffs: &Coefficients, pack_ma: i32, rated_ma: u32, soc_cpct: u16) -> f32 {
    if rated_ma == 0 {
        return 0.0;
    }
    let c_rate = charge_ma(pack_ma) as f32 / rated_ma as f32;
    let soc = f32::from(soc_cpct.min(SOC_FULL_CPCT));
    let r = (coeffs.g + coeffs.h * soc) * c_rate;
    if r.is_finite() {
        r.clamp(0.0, CURRENT_RATIO_MAX)
    } else {
        0.0
    }
}

/// `exp(k1·Δ + k2·Δ² + k3·Δ³)` with Δ in °C from the reference.
///
/// `(a, b, c)` apply below the reference and `(d, e, f)` at or above it, so
/// the ratio is exactly 1.0 at the reference temperature.
pub fn temperature_ratio(coeffs: &Coefficients, temp_dc: i16, ref_dc: i16) -> f32 {
    let dt = temp_delta_dc(temp_dc, ref_dc) as f32 / 10.0;
    let (k1, k2, k3) = if dt < 0.0 {
        (coeffs.a, coeffs.b, coeffs.c)
    } else {
        (coeffs.d, coeffs.e, coeffs.f)
    };
    let r = (dt * (k1 + dt * (k2 + dt * k3))).exp();
    if r.is_nan() {
        1.0
    } else {
        r.clamp(TEMP_RATIO_MIN, TEMP_RATIO_MAX)
    }
}

/// Cell voltage with its overpotential normalised to reference conditions:
/// `OCV + (V - OCV) / (tr * cr)`.
///
/// Returns the raw voltage when the product is too small to normalise
/// (no charge current flowing).
pub fn temp_curr_compensated_voltage(
    cell_mv: u16,
    ocv_mv: u16,
    temperature_ratio: f32,
    current_ratio: f32,
) -> u16 {
    let k = temperature_ratio * current_ratio;
    if !k.is_finite() || k < MIN_COMPENSATION_PRODUCT {
        return cell_mv;
    }
    let ocv = f32::from(ocv_mv);
    saturate_u16(ocv + (f32::from(cell_mv) - ocv) / k)
}

/// Charge current adjusted for sensor temperature.
///
/// Strictly inside `(min, max)` the input is returned unchanged. Beyond a
/// limit the current ramps linearly to 0 over `derate_span_dc`.
pub fn temp_compensated_charge_current(limits: &TempLimits, charge_ma: u32, temp_dc: i16) -> u32 {
    if temp_dc > limits.min_dc && temp_dc < limits.max_dc {
        return charge_ma;
    }
    let excess = if temp_dc >= limits.max_dc {
        temp_delta_dc(temp_dc, limits.max_dc)
    } else {
        temp_delta_dc(limits.min_dc, temp_dc)
    };
    let span = i32::from(limits.derate_span_dc.max(1));
    if excess >= span {
        return 0;
    }
    // 0 <= excess < span
    let keep = u64::from((span - excess).unsigned_abs());
    let scaled = u64::from(charge_ma) * keep / u64::from(span.unsigned_abs());
    u32::try_from(scaled).unwrap_or(charge_ma)
}
