//! Extension trait for U256 arithmetic operations.

use alloy_primitives::U256;

/// Extension trait for U256 to add utility methods.
pub trait U256Ext: Sized {
    /// Convert to an `f64`, losing precision for values that exceed the
    /// 53-bit mantissa. Large values saturate to a finite float instead of
    /// erroring because callers only use the result for display-grade
    /// aggregates (USD sums), never for on-ledger amounts.
    fn to_f64_lossy(&self) -> f64;

    /// `10^exp` as a U256. Panics if the result overflows 256 bits, which
    /// cannot happen for token decimal exponents (<= 77).
    fn exp10(exp: u8) -> Self;
}

impl U256Ext for U256 {
    fn to_f64_lossy(&self) -> f64 {
        self.as_limbs()
            .iter()
            .enumerate()
            .map(|(i, limb)| (*limb as f64) * 2f64.powi(64 * i as i32))
            .sum()
    }

    fn exp10(exp: u8) -> Self {
        U256::from(10u64).pow(U256::from(exp))
    }
}
