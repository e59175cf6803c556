use rust_decimal::Decimal;

use crate::types::Candle;

/// Volume-weighted average price over the given window:
/// sum(typical * volume) / sum(volume), typical = (H + L + C) / 3.
pub fn vwap(candles: &[Candle]) -> Decimal {
    let mut tp_volume = Decimal::ZERO;
    let mut total_volume = Decimal::ZERO;
    for candle in candles {
        tp_volume += candle.typical_price() * candle.volume;
        total_volume += candle.volume;
    }
    if total_volume.is_zero() {
        return Decimal::ZERO;
    }
    tp_volume / total_volume
}
