use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Per-symbol setup lifecycle. The transition table below is the only place
/// that knows which edges exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyState {
    Idle,
    RangeDefined,
    BreakoutDetected,
    WaitPullback,
    LimitOrderPlaced,
    InPosition,
    Exit,
    Reset,
}

impl StrategyState {
    pub fn allowed_next(&self) -> &'static [StrategyState] {
        use StrategyState::*;
        match self {
            Idle => &[RangeDefined],
            RangeDefined => &[BreakoutDetected, Reset],
            BreakoutDetected => &[WaitPullback, Reset],
            WaitPullback => &[LimitOrderPlaced, Reset],
            LimitOrderPlaced => &[InPosition, Reset],
            InPosition => &[Exit, Reset],
            Exit => &[Reset],
            Reset => &[Idle],
        }
    }
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyState::Idle => "IDLE",
            StrategyState::RangeDefined => "RANGE_DEFINED",
            StrategyState::BreakoutDetected => "BREAKOUT_DETECTED",
            StrategyState::WaitPullback => "WAIT_PULLBACK",
            StrategyState::LimitOrderPlaced => "LIMIT_ORDER_PLACED",
            StrategyState::InPosition => "IN_POSITION",
            StrategyState::Exit => "EXIT",
            StrategyState::Reset => "RESET",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: StrategyState,
    pub to: StrategyState,
}

/// Finite automaton enforcing the transition graph. Illegal requests leave
/// the state untouched and surface a typed error; the timestamp of entry
/// into the current state backs the timeout checks upstream.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: StrategyState,
    entered_at: DateTime<Utc>,
}

impl StateMachine {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: StrategyState::Idle,
            entered_at: now,
        }
    }

    pub fn state(&self) -> StrategyState {
        self.state
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    pub fn transition(
        &mut self,
        next: StrategyState,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.state.allowed_next().contains(&next) {
            let err = TransitionError {
                from: self.state,
                to: next,
            };
            warn!("{}", err);
            return Err(err);
        }
        self.state = next;
        self.entered_at = now;
        Ok(())
    }

    /// Walk back to IDLE through RESET from any non-idle state.
    pub fn force_reset(&mut self, now: DateTime<Utc>) {
        if self.state == StrategyState::Idle {
            return;
        }
        if self.state != StrategyState::Reset {
            // Every non-idle state has a RESET edge.
            let _ = self.transition(StrategyState::Reset, now);
        }
        let _ = self.transition(StrategyState::Idle, now);
    }
}
