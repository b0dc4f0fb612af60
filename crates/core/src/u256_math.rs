//! U256 fixed-point arithmetic for health and bonus calculations.
//!
//! Monetary values are USD in 18-decimal fixed point (WAD). Weights and
//! discounts are basis points. Nothing on the decision path goes through
//! floating point; `wad_to_f64` exists for logging only.

use alloy::primitives::U256;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10_000u64, 0, 0, 0]);

/// Power of 10 as U256.
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 20 {
        U256::from(10u64.pow(exp as u32))
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

/// Scale `value` by a basis-point factor: `value * bps / 10000`.
///
/// Example: mul_bps(1000, 9000) = 900
#[inline(always)]
pub fn mul_bps(value: U256, bps: u32) -> U256 {
    value.saturating_mul(U256::from(bps)) / BPS_DENOMINATOR
}

/// Apply basis points reduction (e.g., for slippage).
/// Returns: value * (10000 - basis_points) / 10000
///
/// Example: apply_basis_points(1000, 100) = 990 (1% reduction)
#[inline(always)]
pub fn apply_basis_points(value: U256, basis_points: u16) -> U256 {
    let factor = U256::from(10_000u16.saturating_sub(basis_points));
    value.saturating_mul(factor) / BPS_DENOMINATOR
}

/// USD value in WAD of a native token amount at a WAD price.
///
/// Formula: amount * price_wad / 10^decimals
///
/// Example: 1000 USDC (6 decimals) at $1 = 1000 * 10^18 WAD
#[inline(always)]
pub fn value_wad(amount: U256, price_wad: U256, decimals: u8) -> U256 {
    if amount.is_zero() || price_wad.is_zero() {
        return U256::ZERO;
    }
    amount.saturating_mul(price_wad) / pow10(decimals)
}

/// Native token amount worth `value` WAD at a WAD price (rounded down).
#[inline(always)]
pub fn amount_for_value(value: U256, price_wad: U256, decimals: u8) -> U256 {
    if price_wad.is_zero() {
        return U256::ZERO;
    }
    value.saturating_mul(pow10(decimals)) / price_wad
}

/// Multiply two WAD values: (a * b) / WAD
#[inline(always)]
pub fn wad_mul(a: U256, b: U256) -> U256 {
    a.saturating_mul(b) / WAD
}

/// Divide two WAD values: (a * WAD) / b. Returns U256::MAX if b is zero.
#[inline(always)]
pub fn wad_div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::MAX;
    }
    a.saturating_mul(WAD) / b
}

/// Convert WAD (18 decimals) to f64.
/// Use only for display/logging, not for computation.
#[inline(always)]
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        let limbs = wad.as_limbs();
        let high = limbs[1] as f64 * (u64::MAX as f64 + 1.0);
        let low = limbs[0] as f64;
        (high + low) / 1e18
    }
}

/// Convert f64 to WAD (18 decimals).
/// Use for converting configuration input to U256.
#[inline(always)]
pub fn f64_to_wad(value: f64) -> U256 {
    if !value.is_finite() || value <= 0.0 {
        return U256::ZERO;
    }
    U256::from((value * 1e18) as u128)
}
