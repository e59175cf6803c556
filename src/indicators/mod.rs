//! Pure indicator functions over candle and price slices. Nothing in here
//! holds state or mutates its input; insufficient input yields zero.
#![allow(dead_code)]

pub mod adx;
pub mod atr;
pub mod ema;
pub mod rsi;
pub mod vwap;

pub use adx::*;
pub use atr::*;
pub use ema::*;
pub use rsi::*;
pub use vwap::*;

use rust_decimal::Decimal;

pub fn sma(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period {
        return Decimal::ZERO;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    sum / Decimal::from(period as u64)
}

/// Population standard deviation over the whole slice.
pub fn stddev(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let n = Decimal::from(values.len() as u64);
    let mean: Decimal = values.iter().sum::<Decimal>() / n;
    let variance: Decimal = values
        .iter()
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / n;
    sqrt_decimal(variance)
}

/// (last - SMA(period)) / population sigma over the same window.
pub fn zscore(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period {
        return Decimal::ZERO;
    }
    let window = &values[values.len() - period..];
    let sigma = stddev(window);
    if sigma.is_zero() {
        return Decimal::ZERO;
    }
    let last = values[values.len() - 1];
    (last - sma(values, period)) / sigma
}

pub(crate) fn sqrt_decimal(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_sign_negative() {
        return Decimal::ZERO;
    }

    let mut guess = value / Decimal::from(2);
    if guess.is_zero() {
        guess = value;
    }
    let epsilon = Decimal::new(1, 10); // 0.0000000001

    for _ in 0..50 {
        let new_guess = (guess + value / guess) / Decimal::from(2);
        if (new_guess - guess).abs() < epsilon {
            return new_guess;
        }
        guess = new_guess;
    }
    guess
}
