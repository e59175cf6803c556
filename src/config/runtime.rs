use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub general: GeneralSettings,
    pub risk: RiskSettings,
    pub execution: ExecutionSettings,
    pub range: RangeSettings,
    pub breakout: BreakoutSettings,
    pub pullback: PullbackSettings,
    pub regime: RegimeSettings,
}

impl RuntimeConfig {
    /// Load from a TOML file, falling back to compiled defaults when the file
    /// does not exist. Parse errors are fatal.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            info!("No config file at {}, using defaults", path);
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        let config: RuntimeConfig =
            toml::from_str(&raw).with_context(|| format!("failed to parse {}", path))?;
        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.general.initial_capital <= Decimal::ZERO {
            errors.push("general: initial_capital must be > 0".to_string());
        }
        if self.risk.risk_per_trade_pct <= Decimal::ZERO || self.risk.risk_per_trade_pct > dec!(10)
        {
            errors.push("risk: risk_per_trade_pct must be between 0 and 10%".to_string());
        }
        if self.risk.max_daily_loss_pct <= Decimal::ZERO
            || self.risk.max_daily_loss_pct > dec!(100)
        {
            errors.push("risk: max_daily_loss_pct must be between 0 and 100%".to_string());
        }
        if self.risk.max_consecutive_losses == 0 {
            errors.push("risk: max_consecutive_losses must be > 0".to_string());
        }
        if self.risk.rr_ratio < Decimal::ONE {
            errors.push("risk: rr_ratio must be >= 1".to_string());
        }
        if self.execution.maker_fee < Decimal::ZERO || self.execution.taker_fee < Decimal::ZERO {
            errors.push("execution: fee rates must be >= 0".to_string());
        }
        if self.execution.slippage < Decimal::ZERO {
            errors.push("execution: slippage must be >= 0".to_string());
        }
        if self.execution.leverage < Decimal::ONE {
            errors.push("execution: leverage must be >= 1".to_string());
        }
        if self.execution.maintenance_margin < Decimal::ZERO
            || self.execution.maintenance_margin >= Decimal::ONE / self.execution.leverage.max(Decimal::ONE)
        {
            errors.push("execution: maintenance_margin must be in [0, 1/leverage)".to_string());
        }
        if self.execution.order_ttl_minutes == 0 {
            errors.push("execution: order_ttl_minutes must be > 0".to_string());
        }
        if self.range.window < 2 {
            errors.push("range: window must be >= 2".to_string());
        }
        if self.range.min_size_multiplier <= Decimal::ZERO
            || self.range.min_size_multiplier >= self.range.max_size_multiplier
        {
            errors.push("range: size multipliers must satisfy 0 < min < max".to_string());
        }
        if self.breakout.min_body_percent < Decimal::ZERO
            || self.breakout.min_body_percent > dec!(100)
        {
            errors.push("breakout: min_body_percent must be between 0 and 100".to_string());
        }
        if self.breakout.volume_period == 0 {
            errors.push("breakout: volume_period must be > 0".to_string());
        }
        if self.pullback.max_depth_percent <= Decimal::ZERO
            || self.pullback.max_depth_percent > dec!(100)
        {
            errors.push("pullback: max_depth_percent must be between 0 and 100".to_string());
        }
        if self.pullback.max_wait_minutes == 0 {
            errors.push("pullback: max_wait_minutes must be > 0".to_string());
        }
        if self.regime.adx_min >= self.regime.adx_max {
            errors.push("regime: adx_min must be < adx_max".to_string());
        }
        if self.regime.volatility_min_pct >= self.regime.volatility_max_pct {
            errors.push("regime: volatility_min_pct must be < volatility_max_pct".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub initial_capital: Decimal,
    pub db_path: String,
    pub tick_interval_ms: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            initial_capital: dec!(10000),
            db_path: "sqlite:./rangebreak.db".to_string(),
            tick_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Fraction of balance risked per trade, as a percentage.
    pub risk_per_trade_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub max_consecutive_losses: u32,
    /// Take-profit distance as a multiple of the stop distance.
    pub rr_ratio: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: dec!(1.0),
            max_daily_loss_pct: dec!(10),
            max_consecutive_losses: 10,
            rr_ratio: dec!(2.5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub slippage: Decimal,
    pub leverage: Decimal,
    pub maintenance_margin: Decimal,
    /// Market-time lifetime of an unfilled limit order.
    pub order_ttl_minutes: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            maker_fee: dec!(0.0002),
            taker_fee: dec!(0.0005),
            slippage: dec!(0.0001),
            leverage: dec!(10),
            maintenance_margin: dec!(0.005),
            order_ttl_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSettings {
    /// Number of 5m candles scanned for the bracket.
    pub window: usize,
    pub min_size_multiplier: Decimal,
    pub max_size_multiplier: Decimal,
}

impl Default for RangeSettings {
    fn default() -> Self {
        Self {
            window: 30,
            min_size_multiplier: dec!(1.2),
            max_size_multiplier: dec!(3.5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutSettings {
    /// The close must clear the boundary by this many ATRs.
    pub atr_multiplier: Decimal,
    pub min_body_percent: Decimal,
    pub volume_period: usize,
    pub volume_multiplier: Decimal,
}

impl Default for BreakoutSettings {
    fn default() -> Self {
        Self {
            atr_multiplier: dec!(0.1),
            min_body_percent: dec!(50),
            volume_period: 20,
            volume_multiplier: dec!(0.8),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullbackSettings {
    pub max_depth_percent: Decimal,
    pub price_tolerance_percent: Decimal,
    pub max_wait_minutes: u64,
}

impl Default for PullbackSettings {
    fn default() -> Self {
        Self {
            max_depth_percent: dec!(50),
            price_tolerance_percent: dec!(0.2),
            max_wait_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeSettings {
    pub adx_min: Decimal,
    pub adx_max: Decimal,
    pub volatility_min_pct: Decimal,
    pub volatility_max_pct: Decimal,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            adx_min: dec!(15),
            adx_max: dec!(50),
            volatility_min_pct: dec!(0.1),
            volatility_max_pct: dec!(1.5),
        }
    }
}
