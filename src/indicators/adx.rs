use rust_decimal::Decimal;

use super::atr::true_range;
use crate::types::Candle;

/// Average directional index with Wilder smoothing of +DM, -DM and TR, and a
/// Wilder-smoothed DX series on top. Needs 2 * period bars to produce a value.
pub fn adx(candles: &[Candle], period: usize) -> Decimal {
    if period == 0 || candles.len() < 2 * period {
        return Decimal::ZERO;
    }

    let hundred = Decimal::from(100);
    let period_dec = Decimal::from(period as u64);

    let mut plus_dms = Vec::with_capacity(candles.len() - 1);
    let mut minus_dms = Vec::with_capacity(candles.len() - 1);
    let mut trs = Vec::with_capacity(candles.len() - 1);

    for window in candles.windows(2) {
        let (prev, curr) = (&window[0], &window[1]);
        let up_move = curr.high - prev.high;
        let down_move = prev.low - curr.low;

        let plus_dm = if up_move > down_move && up_move > Decimal::ZERO {
            up_move
        } else {
            Decimal::ZERO
        };
        let minus_dm = if down_move > up_move && down_move > Decimal::ZERO {
            down_move
        } else {
            Decimal::ZERO
        };

        plus_dms.push(plus_dm);
        minus_dms.push(minus_dm);
        trs.push(true_range(curr, Some(prev.close)));
    }

    // Wilder accumulation: seed with the first `period` sums, then
    // smoothed = prev - prev / period + current.
    let mut sm_plus: Decimal = plus_dms[..period].iter().sum();
    let mut sm_minus: Decimal = minus_dms[..period].iter().sum();
    let mut sm_tr: Decimal = trs[..period].iter().sum();

    let dx_at = |sm_plus: Decimal, sm_minus: Decimal, sm_tr: Decimal| -> Decimal {
        if sm_tr.is_zero() {
            return Decimal::ZERO;
        }
        let plus_di = hundred * sm_plus / sm_tr;
        let minus_di = hundred * sm_minus / sm_tr;
        let di_sum = plus_di + minus_di;
        if di_sum.is_zero() {
            return Decimal::ZERO;
        }
        hundred * (plus_di - minus_di).abs() / di_sum
    };

    let mut dxs = vec![dx_at(sm_plus, sm_minus, sm_tr)];
    for i in period..trs.len() {
        sm_plus = sm_plus - sm_plus / period_dec + plus_dms[i];
        sm_minus = sm_minus - sm_minus / period_dec + minus_dms[i];
        sm_tr = sm_tr - sm_tr / period_dec + trs[i];
        dxs.push(dx_at(sm_plus, sm_minus, sm_tr));
    }

    if dxs.len() < period {
        return Decimal::ZERO;
    }

    let mut value: Decimal = dxs[..period].iter().sum::<Decimal>() / period_dec;
    for dx in &dxs[period..] {
        value = (value * (period_dec - Decimal::ONE) + *dx) / period_dec;
    }
    value
}
