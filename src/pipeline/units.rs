//! Wei → ETH conversion with exact fixed-point scaling

use super::error::UnitsError;
use rust_decimal::Decimal;

/// Decimal places between wei and ether
pub const WEI_DECIMALS: u32 = 18;

/// Convert an integer wei string into an exact ETH amount
///
/// No floating point is involved: the integer is reinterpreted with a
/// scale of 18, so "2500000000000000000" becomes exactly 2.5.
pub fn wei_to_eth(wei: &str) -> Result<Decimal, UnitsError> {
    let trimmed = wei.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnitsError::NotAnInteger(wei.to_string()));
    }

    let amount: i128 = trimmed
        .parse()
        .map_err(|_| UnitsError::Overflow(wei.to_string()))?;

    Decimal::try_from_i128_with_scale(amount, WEI_DECIMALS)
        .map(|eth| eth.normalize())
        .map_err(|_| UnitsError::Overflow(wei.to_string()))
}
