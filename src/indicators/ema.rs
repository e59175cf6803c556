use rust_decimal::Decimal;

/// Exponential moving average seeded with the SMA of the first `period`
/// values; multiplier 2 / (period + 1). Returns the value at the end of the
/// series.
pub fn ema(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period {
        return Decimal::ZERO;
    }

    let period_dec = Decimal::from(period as u64);
    let multiplier = Decimal::from(2) / (period_dec + Decimal::ONE);

    let mut value: Decimal = values[..period].iter().sum::<Decimal>() / period_dec;
    for price in &values[period..] {
        value = (*price - value) * multiplier + value;
    }
    value
}
