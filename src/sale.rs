use ethers::{types::U256, utils::format_ether};

use crate::utils::u256_to_f64;

/// Supply figures of the token sale as displayed by the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleFigures {
    pub token_price: U256,
    pub total_supply: U256,
    pub remaining_supply: U256,
    pub tokens_claimed: U256,
    /// `None` while the remaining supply is zero.
    pub progress_percent: Option<f64>,
}

impl SaleFigures {
    pub fn compute(token_price: U256, total_supply: U256, remaining_supply: U256) -> Self {
        let tokens_claimed = tokens_claimed(total_supply, remaining_supply);
        Self {
            token_price,
            total_supply,
            remaining_supply,
            tokens_claimed,
            progress_percent: progress_percent(tokens_claimed, remaining_supply),
        }
    }

    pub fn token_price_ether(&self) -> String {
        format_ether(self.token_price)
    }
}

/// Tokens handed out so far. A remaining supply above the total reads as nothing claimed.
pub fn tokens_claimed(total_supply: U256, remaining_supply: U256) -> U256 {
    total_supply.saturating_sub(remaining_supply)
}

/// Progress bar width: claimed tokens relative to the *remaining* supply, not the total.
pub fn progress_percent(tokens_claimed: U256, remaining_supply: U256) -> Option<f64> {
    if remaining_supply.is_zero() {
        return None;
    }
    let claimed = u256_to_f64(tokens_claimed).ceil();
    Some(claimed / u256_to_f64(remaining_supply) * 100.0)
}
