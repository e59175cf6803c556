use rust_decimal::Decimal;

/// Wilder's relative strength index. The first average gain/loss is the SMA
/// of the first `period` changes; after that both smooth with
/// `(prev * (period - 1) + current) / period`.
pub fn rsi(values: &[Decimal], period: usize) -> Decimal {
    if period == 0 || values.len() < period + 1 {
        return Decimal::ZERO;
    }

    let hundred = Decimal::from(100);
    let period_dec = Decimal::from(period as u64);

    let mut gains = Vec::with_capacity(values.len() - 1);
    let mut losses = Vec::with_capacity(values.len() - 1);
    for window in values.windows(2) {
        let change = window[1] - window[0];
        if change > Decimal::ZERO {
            gains.push(change);
            losses.push(Decimal::ZERO);
        } else {
            gains.push(Decimal::ZERO);
            losses.push(-change);
        }
    }

    let mut avg_gain: Decimal = gains[..period].iter().sum::<Decimal>() / period_dec;
    let mut avg_loss: Decimal = losses[..period].iter().sum::<Decimal>() / period_dec;
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gains[i]) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + losses[i]) / period_dec;
    }

    if avg_loss.is_zero() {
        return hundred;
    }
    let rs = avg_gain / avg_loss;
    hundred - hundred / (Decimal::ONE + rs)
}
