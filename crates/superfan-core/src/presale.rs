/// PRESALE QUOTES
///
/// Campaign tokens are sold in whole units at a fixed USDC price. A payment
/// must buy an exact number of tokens and must fit under the supply cap.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresaleError {
    #[error("Presale price must be positive")]
    InvalidPrice,
    #[error("Amount {0} buys no whole tokens")]
    InvalidAmount(u64),
    #[error("Amount {amount} is not a multiple of the token price {price}")]
    NotExactMultiple { amount: u64, price: u64 },
    #[error("Supply exceeded: {requested} requested, {available} available")]
    SupplyExceeded { requested: u64, available: u64 },
    #[error("Math operation overflow")]
    MathOverflow,
}

/// Pricing terms of one campaign presale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresaleTerms {
    /// Price of one token in USDC minor units
    pub price_per_token: u64,
    /// Maximum tokens that can ever be sold; `None` is uncapped
    pub total_supply: Option<u64>,
    pub tokens_sold: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresaleQuote {
    pub tokens: u64,
    pub cost: u64,
    pub tokens_remaining: Option<u64>,
}

impl PresaleTerms {
    pub fn new(price_per_token: u64, total_supply: Option<u64>, tokens_sold: u64) -> Result<Self, PresaleError> {
        if price_per_token == 0 {
            return Err(PresaleError::InvalidPrice);
        }
        Ok(PresaleTerms {
            price_per_token,
            total_supply,
            tokens_sold,
        })
    }

    /// Quote a purchase of `amount` minor units
    pub fn quote(&self, amount: u64) -> Result<PresaleQuote, PresaleError> {
        if self.price_per_token == 0 {
            return Err(PresaleError::InvalidPrice);
        }
        let tokens = amount
            .checked_div(self.price_per_token)
            .ok_or(PresaleError::MathOverflow)?;
        if tokens == 0 {
            return Err(PresaleError::InvalidAmount(amount));
        }

        let cost = tokens
            .checked_mul(self.price_per_token)
            .ok_or(PresaleError::MathOverflow)?;
        if cost != amount {
            return Err(PresaleError::NotExactMultiple {
                amount,
                price: self.price_per_token,
            });
        }

        let tokens_remaining = match self.total_supply {
            Some(supply) => {
                let available = supply.saturating_sub(self.tokens_sold);
                let new_total = self
                    .tokens_sold
                    .checked_add(tokens)
                    .ok_or(PresaleError::MathOverflow)?;
                if new_total > supply {
                    return Err(PresaleError::SupplyExceeded {
                        requested: tokens,
                        available,
                    });
                }
                Some(supply - new_total)
            }
            None => None,
        };

        Ok(PresaleQuote {
            tokens,
            cost,
            tokens_remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_token_quote() {
        let terms = PresaleTerms::new(250_000, None, 0).unwrap();
        let quote = terms.quote(1_000_000).unwrap();
        assert_eq!(quote.tokens, 4);
        assert_eq!(quote.cost, 1_000_000);
        assert_eq!(quote.tokens_remaining, None);
    }

    #[test]
    fn test_partial_token_rejected() {
        let terms = PresaleTerms::new(250_000, None, 0).unwrap();
        assert_eq!(
            terms.quote(1_100_000),
            Err(PresaleError::NotExactMultiple {
                amount: 1_100_000,
                price: 250_000
            })
        );
        assert_eq!(terms.quote(100), Err(PresaleError::InvalidAmount(100)));
    }

    #[test]
    fn test_supply_cap() {
        let terms = PresaleTerms::new(100, Some(10), 8).unwrap();
        assert_eq!(terms.quote(200).unwrap().tokens_remaining, Some(0));
        assert_eq!(
            terms.quote(300),
            Err(PresaleError::SupplyExceeded {
                requested: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_zero_price_rejected() {
        assert_eq!(PresaleTerms::new(0, None, 0), Err(PresaleError::InvalidPrice));
    }
}
