//! Profit/loss calculation for lay selections.
//!
//! Every selection is a lay of one unit of stake. The functions here map a
//! race result and the settlement prices to the P/L booked against the
//! selection on the win market and, for systems that run one, the place
//! market. They are pure: the same inputs always produce the same output.
//!
//! # Win market
//! - `WON`: the lay loses `stake * (price - 1)`, i.e. `stake * (1 - winBsp)`
//! - `LOST` / `PLACED`: the lay collects the stake less commission
//! - `NR` / `VOID` / `CANCELLED`: zero
//!
//! # Place market
//! - `WON` / `PLACED` with a place price: `stake * (1 - placeBsp)`
//! - `WON` / `PLACED` without a place price: the market was voided and the
//!   stake is booked back
//! - `LOST`: stake less commission
//! - `NR` / `VOID` / `CANCELLED`: zero

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::result::RaceResult;

// =============================================================================
// Constants
// =============================================================================

/// Default exchange commission on winning lays (2%).
pub const DEFAULT_COMMISSION: Decimal = dec!(0.02);

/// Default stake per selection (one unit).
pub const DEFAULT_STAKE: Decimal = Decimal::ONE;

/// Highest decimal price an exchange quotes.
pub const MAX_PRICE: Decimal = dec!(1000);

/// Number of decimal places used when presenting P/L.
pub const DISPLAY_DP: u32 = 2;

// =============================================================================
// Configuration
// =============================================================================

/// Commission and stake used by the P/L formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlConfig {
    /// Commission charged on a winning lay (0.02 for 2%).
    pub commission: Decimal,
    /// Units staked per selection.
    pub stake: Decimal,
}

impl Default for PlConfig {
    fn default() -> Self {
        Self {
            commission: DEFAULT_COMMISSION,
            stake: DEFAULT_STAKE,
        }
    }
}

impl PlConfig {
    /// Creates a configuration with custom commission and stake.
    #[must_use]
    pub fn new(commission: Decimal, stake: Decimal) -> Self {
        Self { commission, stake }
    }

    /// Return on a lay that wins (the backed horse lost).
    #[must_use]
    pub fn lay_win_return(&self) -> Decimal {
        self.stake * (Decimal::ONE - self.commission)
    }

    /// Liability paid out on a lay that loses at `price`.
    #[must_use]
    pub fn lay_loss(&self, price: Decimal) -> Decimal {
        self.stake * (Decimal::ONE - price)
    }
}

/// Market setup of one trading system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemProfile {
    /// Whether the system also lays the place market.
    pub place_market: bool,
    /// Commission and stake for this system.
    pub pl: PlConfig,
}

impl Default for SystemProfile {
    fn default() -> Self {
        Self {
            place_market: false,
            pl: PlConfig::default(),
        }
    }
}

impl SystemProfile {
    /// Win-market-only profile.
    #[must_use]
    pub fn win_only(pl: PlConfig) -> Self {
        Self {
            place_market: false,
            pl,
        }
    }

    /// Profile laying both the win and place markets.
    #[must_use]
    pub fn with_place_market(pl: PlConfig) -> Self {
        Self {
            place_market: true,
            pl,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised when a result cannot be priced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlError {
    /// A winning horse needs its starting price to compute the liability.
    #[error("result WON requires a win price")]
    MissingWinPrice,

    /// Decimal odds must lie between 1.0 and [`MAX_PRICE`].
    #[error("invalid {market} price {price}: decimal odds must be between 1.0 and 1000")]
    InvalidPrice {
        /// Market the price belongs to ("win" or "place").
        market: &'static str,
        /// Offending price.
        price: Decimal,
    },
}

// =============================================================================
// Calculator
// =============================================================================

/// P/L values computed for one settled selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledPl {
    /// Win-market P/L.
    pub win_pl: Decimal,
    /// Place-market P/L; `None` when the system does not lay the place market.
    pub place_pl: Option<Decimal>,
}

/// Computes the win-market P/L for a result.
///
/// # Errors
/// Returns an error if the result is `WON` and no valid win price is given.
pub fn win_pl(
    result: RaceResult,
    win_bsp: Option<Decimal>,
    config: &PlConfig,
) -> Result<Decimal, PlError> {
    match result {
        RaceResult::Won => {
            let price = win_bsp.ok_or(PlError::MissingWinPrice)?;
            check_price("win", price)?;
            Ok(config.lay_loss(price))
        }
        RaceResult::Lost | RaceResult::Placed => Ok(config.lay_win_return()),
        RaceResult::NonRunner | RaceResult::Void | RaceResult::Cancelled => Ok(Decimal::ZERO),
    }
}

/// Computes the place-market P/L for a result.
///
/// # Errors
/// Returns an error if a place price is supplied but is not a valid decimal
/// price.
pub fn place_pl(
    result: RaceResult,
    place_bsp: Option<Decimal>,
    config: &PlConfig,
) -> Result<Decimal, PlError> {
    match result {
        RaceResult::Won | RaceResult::Placed => match place_bsp {
            Some(price) => {
                check_price("place", price)?;
                Ok(config.lay_loss(price))
            }
            None => Ok(config.stake),
        },
        RaceResult::Lost => Ok(config.lay_win_return()),
        RaceResult::NonRunner | RaceResult::Void | RaceResult::Cancelled => Ok(Decimal::ZERO),
    }
}

/// Computes both markets for a selection owned by a system with `profile`.
///
/// # Errors
/// Propagates pricing errors from [`win_pl`] and [`place_pl`].
pub fn settle(
    result: RaceResult,
    win_bsp: Option<Decimal>,
    place_bsp: Option<Decimal>,
    profile: &SystemProfile,
) -> Result<SettledPl, PlError> {
    let win_pl = win_pl(result, win_bsp, &profile.pl)?;
    let place_pl = if profile.place_market {
        Some(place_pl(result, place_bsp, &profile.pl)?)
    } else {
        None
    };

    Ok(SettledPl { win_pl, place_pl })
}

/// Rounds a P/L value for presentation. Stored values keep full precision.
#[must_use]
pub fn display_pl(value: Decimal) -> Decimal {
    value.round_dp(DISPLAY_DP)
}

fn check_price(market: &'static str, price: Decimal) -> Result<(), PlError> {
    if price < Decimal::ONE || price > MAX_PRICE {
        return Err(PlError::InvalidPrice { market, price });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> PlConfig {
        PlConfig::default()
    }

    #[test]
    fn test_won_lay_loses_price_minus_one() {
        let pl = win_pl(RaceResult::Won, Some(dec!(3.0)), &default_config()).unwrap();
        assert_eq!(pl, dec!(-2.0));

        let pl = win_pl(RaceResult::Won, Some(dec!(2.0)), &default_config()).unwrap();
        assert_eq!(pl, dec!(-1.0));
    }

    #[test]
    fn test_lost_collects_stake_less_commission() {
        let pl = win_pl(RaceResult::Lost, None, &default_config()).unwrap();
        assert_eq!(pl, dec!(0.98));
    }

    #[test]
    fn test_void_results_are_zero() {
        for result in [RaceResult::Void, RaceResult::NonRunner, RaceResult::Cancelled] {
            assert_eq!(
                win_pl(result, Some(dec!(4.5)), &default_config()).unwrap(),
                Decimal::ZERO
            );
            assert_eq!(
                place_pl(result, Some(dec!(1.8)), &default_config()).unwrap(),
                Decimal::ZERO
            );
        }
    }

    #[test]
    fn test_placed_on_win_market_is_a_loss_for_the_backer() {
        let pl = win_pl(RaceResult::Placed, Some(dec!(6.0)), &default_config()).unwrap();
        assert_eq!(pl, dec!(0.98));
    }

    #[test]
    fn test_won_without_price_is_an_error() {
        assert_eq!(
            win_pl(RaceResult::Won, None, &default_config()),
            Err(PlError::MissingWinPrice)
        );
    }

    #[test]
    fn test_price_below_one_is_rejected() {
        let err = win_pl(RaceResult::Won, Some(dec!(0.5)), &default_config()).unwrap_err();
        assert!(matches!(err, PlError::InvalidPrice { market: "win", .. }));
    }

    #[test]
    fn test_implausible_prices_are_rejected() {
        let config = default_config();
        assert_eq!(win_pl(RaceResult::Won, Some(MAX_PRICE), &config).unwrap(), dec!(-999));

        let err = win_pl(RaceResult::Won, Some(Decimal::MAX), &config).unwrap_err();
        assert!(matches!(err, PlError::InvalidPrice { market: "win", .. }));
        let err = place_pl(RaceResult::Placed, Some(dec!(1000.01)), &config).unwrap_err();
        assert!(matches!(err, PlError::InvalidPrice { market: "place", .. }));
    }

    #[test]
    fn test_place_market_formulas() {
        let config = default_config();
        assert_eq!(
            place_pl(RaceResult::Placed, Some(dec!(1.5)), &config).unwrap(),
            dec!(-0.5)
        );
        assert_eq!(
            place_pl(RaceResult::Won, Some(dec!(1.25)), &config).unwrap(),
            dec!(-0.25)
        );
        assert_eq!(place_pl(RaceResult::Won, None, &config).unwrap(), dec!(1.0));
        assert_eq!(place_pl(RaceResult::Lost, None, &config).unwrap(), dec!(0.98));
    }

    #[test]
    fn test_custom_commission_and_stake() {
        let config = PlConfig::new(dec!(0.05), dec!(2));
        assert_eq!(win_pl(RaceResult::Lost, None, &config).unwrap(), dec!(1.90));
        assert_eq!(
            win_pl(RaceResult::Won, Some(dec!(3.5)), &config).unwrap(),
            dec!(-5.0)
        );
    }

    #[test]
    fn test_settle_respects_place_market_flag() {
        let win_only = SystemProfile::default();
        let settled = settle(RaceResult::Lost, Some(dec!(5.0)), Some(dec!(2.0)), &win_only).unwrap();
        assert_eq!(settled.win_pl, dec!(0.98));
        assert_eq!(settled.place_pl, None);

        let with_place = SystemProfile::with_place_market(PlConfig::default());
        let settled =
            settle(RaceResult::Placed, Some(dec!(5.0)), Some(dec!(2.0)), &with_place).unwrap();
        assert_eq!(settled.win_pl, dec!(0.98));
        assert_eq!(settled.place_pl, Some(dec!(-1.0)));
    }

    #[test]
    fn test_place_market_zero_is_distinct_from_not_offered() {
        let with_place = SystemProfile::with_place_market(PlConfig::default());
        let settled = settle(RaceResult::Void, None, None, &with_place).unwrap();
        assert_eq!(settled.place_pl, Some(Decimal::ZERO));
    }

    #[test]
    fn test_display_rounds_to_two_places() {
        assert_eq!(display_pl(dec!(-0.0199999)), dec!(-0.02));
        assert_eq!(display_pl(dec!(0.98)), dec!(0.98));
    }
}
