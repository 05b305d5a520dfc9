/// Exact conversions between cents and ERC-20 token base units.
///
/// Stablecoins are pegged 1:1 to the dollar, so one cent is
/// `10^(decimals - 2)` base units. Nothing here rounds.

use thiserror::Error;

const CENT_DECIMALS: u32 = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Token decimals {0} out of range")]
    DecimalsOutOfRange(u8),
    #[error("Amount overflows token units")]
    Overflow,
    #[error("Amount {units} is not a whole number of cents at {decimals} decimals")]
    FractionalCents { units: u128, decimals: u8 },
}

fn scale(decimals: u8) -> Result<(bool, u128), MoneyError> {
    if decimals > 36 {
        return Err(MoneyError::DecimalsOutOfRange(decimals));
    }
    let d = decimals as u32;
    if d >= CENT_DECIMALS {
        Ok((true, 10u128.pow(d - CENT_DECIMALS)))
    } else {
        Ok((false, 10u128.pow(CENT_DECIMALS - d)))
    }
}

/// Cents to token base units
pub fn cents_to_token_units(cents: u64, decimals: u8) -> Result<u128, MoneyError> {
    let (up, factor) = scale(decimals)?;
    let cents = cents as u128;
    if up {
        cents.checked_mul(factor).ok_or(MoneyError::Overflow)
    } else if cents % factor == 0 {
        Ok(cents / factor)
    } else {
        Err(MoneyError::FractionalCents {
            units: cents,
            decimals,
        })
    }
}

/// Token base units to cents; fails unless the amount is a whole cent
pub fn token_units_to_cents(units: u128, decimals: u8) -> Result<u64, MoneyError> {
    let (up, factor) = scale(decimals)?;
    let cents = if up {
        if units % factor != 0 {
            return Err(MoneyError::FractionalCents { units, decimals });
        }
        units / factor
    } else {
        units.checked_mul(factor).ok_or(MoneyError::Overflow)?
    };
    u64::try_from(cents).map_err(|_| MoneyError::Overflow)
}

/// Cents rendered as a dollar amount for providers that speak floats
pub fn cents_to_dollars(cents: u64) -> f64 {
    cents as f64 / 100.0
}
