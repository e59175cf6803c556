use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RegimeSettings;
use crate::indicators::{adx, atr};
use crate::types::Candle;

const ADX_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const MIN_CANDLES: usize = 30;

/// Classifies a 5m window as tradable or not. A new setup is only sought when
/// ADX and ATR-derived volatility both sit inside their configured bands.
#[derive(Debug, Clone)]
pub struct RegimeFilter {
    settings: RegimeSettings,
}

impl RegimeFilter {
    pub fn new(settings: RegimeSettings) -> Self {
        Self { settings }
    }

    pub fn is_tradable(&self, candles_5m: &[Candle]) -> bool {
        if candles_5m.len() < MIN_CANDLES {
            return false;
        }
        let last_close = match candles_5m.last() {
            Some(c) if !c.close.is_zero() => c.close,
            _ => return false,
        };

        let adx_value = adx(candles_5m, ADX_PERIOD);
        let atr_value = atr(candles_5m, ATR_PERIOD);
        let volatility_pct = atr_value / last_close * Decimal::from(100);

        let adx_ok = adx_value >= self.settings.adx_min && adx_value <= self.settings.adx_max;
        let vol_ok = volatility_pct >= self.settings.volatility_min_pct
            && volatility_pct <= self.settings.volatility_max_pct;

        if !adx_ok || !vol_ok {
            debug!(
                "Regime rejected: ADX={:.1} vol={:.3}%",
                adx_value, volatility_pct
            );
        }
        adx_ok && vol_ok
    }
}
