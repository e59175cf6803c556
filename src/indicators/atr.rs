use rust_decimal::Decimal;

use crate::types::Candle;

/// True range of a bar against the previous close.
pub fn true_range(candle: &Candle, prev_close: Option<Decimal>) -> Decimal {
    let hl = candle.high - candle.low;
    match prev_close {
        Some(prev) => {
            let hc = (candle.high - prev).abs();
            let lc = (candle.low - prev).abs();
            hl.max(hc).max(lc)
        }
        None => hl,
    }
}

/// Average true range with Wilder smoothing: the first value is the SMA of
/// the first `period` true ranges, after that
/// `atr = ((period - 1) * prev + tr) / period`.
pub fn atr(candles: &[Candle], period: usize) -> Decimal {
    if period == 0 || candles.len() < period {
        return Decimal::ZERO;
    }

    let mut trs = Vec::with_capacity(candles.len());
    let mut prev_close = None;
    for candle in candles {
        trs.push(true_range(candle, prev_close));
        prev_close = Some(candle.close);
    }

    let period_dec = Decimal::from(period as u64);
    let mut value: Decimal = trs[..period].iter().sum::<Decimal>() / period_dec;
    for tr in &trs[period..] {
        value = (value * (period_dec - Decimal::ONE) + *tr) / period_dec;
    }
    value
}
