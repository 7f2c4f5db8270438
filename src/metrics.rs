//! Performance metrics derived from a trade ledger

use serde::{Deserialize, Serialize};

use crate::types::TradeEvent;

/// Gains over losses, with an explicit variant for "no losing trades".
///
/// Stored numerically as [`f64::MAX`] when unbounded so that the value stays
/// finite and sortable in the result store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProfitFactor {
    Finite(f64),
    Unbounded,
}

impl ProfitFactor {
    pub const UNBOUNDED_SENTINEL: f64 = f64::MAX;

    /// Convention: no wins and no losses is `0`; wins with zero total loss is unbounded.
    pub fn from_totals(gross_profit: f64, gross_loss_abs: f64) -> Self {
        if gross_loss_abs > 0.0 {
            ProfitFactor::Finite(gross_profit / gross_loss_abs)
        } else if gross_profit > 0.0 {
            ProfitFactor::Unbounded
        } else {
            ProfitFactor::Finite(0.0)
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            ProfitFactor::Finite(v) => *v,
            ProfitFactor::Unbounded => Self::UNBOUNDED_SENTINEL,
        }
    }

    pub fn from_stored(value: f64) -> Self {
        if value >= Self::UNBOUNDED_SENTINEL {
            ProfitFactor::Unbounded
        } else {
            ProfitFactor::Finite(value)
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, ProfitFactor::Unbounded)
    }
}

impl Default for ProfitFactor {
    fn default() -> Self {
        ProfitFactor::Finite(0.0)
    }
}

impl std::fmt::Display for ProfitFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfitFactor::Finite(v) => write!(f, "{:.2}", v),
            ProfitFactor::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Aggregate statistics of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub net_profit: f64,
    pub return_pct: f64,
    pub closed_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Fraction of closed trades with positive pnl (0.0..=1.0)
    pub win_rate: f64,
    pub gross_profit: f64,
    /// Sum of non-positive pnl, reported as a positive number
    pub gross_loss: f64,
    pub profit_factor: ProfitFactor,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Largest peak-to-trough decline of the closing balance, in percent
    pub max_drawdown_pct: f64,
    pub total_fees: f64,
}

impl PerformanceMetrics {
    /// Aggregate a ledger.
    ///
    /// The final balance is the `balance_after` of the last closing event, or
    /// `initial_balance` when nothing closed. An open entry at the end of the
    /// ledger does not affect net profit.
    pub fn from_ledger(events: &[TradeEvent], initial_balance: f64, fee_pct: f64) -> Self {
        let closes: Vec<&TradeEvent> = events.iter().filter(|e| e.action.is_close()).collect();

        let final_balance = closes
            .last()
            .map(|e| e.balance_after)
            .unwrap_or(initial_balance);
        let net_profit = final_balance - initial_balance;
        let return_pct = if initial_balance > 0.0 {
            net_profit / initial_balance * 100.0
        } else {
            0.0
        };

        let wins: Vec<f64> = closes
            .iter()
            .map(|e| e.realized_pnl)
            .filter(|p| *p > 0.0)
            .collect();
        let losses: Vec<f64> = closes
            .iter()
            .map(|e| e.realized_pnl)
            .filter(|p| *p <= 0.0)
            .collect();

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();

        let closed_trades = closes.len();
        let win_rate = if closed_trades > 0 {
            wins.len() as f64 / closed_trades as f64
        } else {
            0.0
        };

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            gross_profit / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            gross_loss / losses.len() as f64
        };

        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().copied().fold(0.0, f64::min);

        let balances = closes.iter().map(|e| e.balance_after);
        let max_drawdown_pct = max_drawdown_pct(std::iter::once(initial_balance).chain(balances));

        PerformanceMetrics {
            net_profit,
            return_pct,
            closed_trades,
            wins: wins.len(),
            losses: losses.len(),
            win_rate,
            gross_profit,
            gross_loss,
            profit_factor: ProfitFactor::from_totals(gross_profit, gross_loss),
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            max_drawdown_pct,
            total_fees: total_fees(events, fee_pct),
        }
    }
}

/// Maximum of `(peak - value) / peak` over a balance trajectory, in percent.
///
/// `peak` is the running maximum of the trajectory so far.
pub fn max_drawdown_pct(balances: impl IntoIterator<Item = f64>) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0;

    for balance in balances {
        if balance > peak {
            peak = balance;
        }
        if peak > 0.0 {
            let dd = (peak - balance) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

/// Fees implied by the ledger.
///
/// Every fill pays `fee_pct` of its gross value, so the gross side of each
/// event can be recovered from its net `balance_after`.
fn total_fees(events: &[TradeEvent], fee_pct: f64) -> f64 {
    let keep = 1.0 - fee_pct / 100.0;
    if keep <= 0.0 {
        return 0.0;
    }
    events
        .iter()
        .map(|e| e.balance_after / keep - e.balance_after)
        .sum()
}
