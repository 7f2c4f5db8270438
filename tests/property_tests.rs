//! Property tests for backtester invariants.
//!
//! Uses proptest to verify over random price walks:
//! 1. Ledger shape: BUY and closing events alternate, starting with BUY
//! 2. Accounting: every close pays out quantity × price less the fee
//! 3. Entry filters: no BUY below the minimum or adaptive trend score
//! 4. Ratchet: the engine's stop only tightens, and fires at the first touch
//! 5. Determinism and indicator bounds

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use band_reversion::backtest::{BacktestResult, Backtester, MarketView, ADAPTIVE_MIN_TREND_SCORE};
use band_reversion::config::IndicatorConfig;
use band_reversion::indicators;
use band_reversion::{Bar, EnrichedBar, StrategyConfig, TradeAction};

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn enrich_walk(closes: &[f64]) -> Vec<EnrichedBar> {
    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let open = if i == 0 { c } else { closes[i - 1] };
            Bar::new_unchecked(
                start_time() + Duration::hours(i as i64),
                open,
                c.max(open),
                c.min(open),
                c,
                10.0,
            )
        })
        .collect();
    indicators::enrich(&bars, &IndicatorConfig::default()).unwrap()
}

fn bar_index(ts: DateTime<Utc>) -> usize {
    (ts - start_time()).num_hours() as usize
}

fn run(config: StrategyConfig, bars: &[EnrichedBar]) -> BacktestResult {
    Backtester::new(config)
        .unwrap()
        .run(MarketView::new(bars))
        .unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// Geometric random walk from 100 with moves up to ±4% per bar
fn arb_closes() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.04..0.04_f64, 25..160).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .map(|r| {
                price *= 1.0 + r;
                price
            })
            .collect()
    })
}

fn arb_config() -> impl Strategy<Value = StrategyConfig> {
    (
        -2.0..5.0_f64,
        prop::option::of(0.0..5.0_f64),
        0.01..1.0_f64,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        0.0..0.5_f64,
        0.0..60.0_f64,
        any::<bool>(),
    )
        .prop_map(
            |(dist, stop, fee, trailing, band_exit, moving, min_profit, min_score, adaptive)| {
                StrategyConfig {
                    band_distance_pct: dist,
                    stop_loss_pct: stop,
                    brokerage_fee_pct: fee,
                    ema_filter_period: None,
                    use_trailing_stop: trailing,
                    exit_at_upper_band: band_exit,
                    moving_target: moving,
                    min_profit_pct: min_profit,
                    min_trend_score: min_score,
                    adaptive,
                    initial_balance: 1000.0,
                }
            },
        )
}

// ── 1. Ledger shape ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn ledger_alternates_buy_and_close(closes in arb_closes(), config in arb_config()) {
        let bars = enrich_walk(&closes);
        let result = run(config, &bars);

        for (i, event) in result.events.iter().enumerate() {
            prop_assert_eq!(event.action == TradeAction::Buy, i % 2 == 0);
        }
        let ends_long = result.events.last().is_some_and(|e| e.action == TradeAction::Buy);
        prop_assert_eq!(result.open_position.is_some(), ends_long);
        prop_assert!(result
            .events
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
    }
}

// ── 2. Accounting ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn closes_pay_out_quantity_times_price_less_fee(
        closes in arb_closes(),
        config in arb_config(),
    ) {
        let fee = config.brokerage_fee_pct / 100.0;
        let bars = enrich_walk(&closes);
        let result = run(config, &bars);

        let mut balance = result.initial_balance;
        for pair in result.events.chunks(2) {
            let buy = &pair[0];
            prop_assert!((buy.balance_after - balance * (1.0 - fee)).abs() < 1e-9 * balance);

            if let Some(close) = pair.get(1) {
                let quantity = buy.balance_after / buy.price;
                let expected = quantity * close.price * (1.0 - fee);
                prop_assert!((close.balance_after - expected).abs() < 1e-9 * expected.max(1.0));
                prop_assert!(close.balance_after >= 0.0);

                let pnl = close.balance_after - buy.balance_after;
                prop_assert!((close.realized_pnl - pnl).abs() < 1e-9 * expected.max(1.0));
                balance = close.balance_after;
            }
        }

        prop_assert_eq!(result.final_balance, balance);
        let m = &result.metrics;
        prop_assert!((m.net_profit - (result.final_balance - result.initial_balance)).abs() < 1e-9);
        prop_assert!((0.0..=1.0).contains(&m.win_rate));
        prop_assert!((0.0..=100.0).contains(&m.max_drawdown_pct));
        prop_assert_eq!(m.closed_trades, result.events.len() / 2);
    }

    #[test]
    fn stop_exits_are_labelled_by_pnl_sign(closes in arb_closes(), config in arb_config()) {
        let has_stop = config.stop_loss().is_some();
        let bars = enrich_walk(&closes);
        let result = run(config, &bars);

        for event in &result.events {
            match event.action {
                TradeAction::StopLoss => {
                    prop_assert!(has_stop);
                    prop_assert!(event.realized_pnl < 0.0);
                }
                TradeAction::TrailingStop => {
                    prop_assert!(has_stop);
                    prop_assert!(event.realized_pnl >= 0.0);
                }
                _ => {}
            }
        }
    }
}

// ── 3. Entry filters ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn entries_respect_trend_floors(closes in arb_closes(), config in arb_config()) {
        let min_score = config.min_trend_score;
        let adaptive = config.adaptive;
        let bars = enrich_walk(&closes);
        let result = run(config, &bars);

        for buy in result.events.iter().filter(|e| e.action == TradeAction::Buy) {
            prop_assert!(buy.trend_score >= min_score);
            if adaptive {
                prop_assert!(buy.trend_score >= ADAPTIVE_MIN_TREND_SCORE);
            }
            let bar = &bars[bar_index(buy.timestamp)];
            prop_assert!(bar.band.is_some());
        }
    }
}

// ── 4. Ratchet monotonicity ──────────────────────────────────────────

proptest! {
    /// With band exits off, the only way out is the stop. Replaying the
    /// ratchet bar by bar must reproduce the exit bar exactly.
    #[test]
    fn trailing_stop_fires_at_first_touch(
        closes in arb_closes(),
        stop_pct in 0.5..5.0_f64,
        dist in 0.0..5.0_f64,
    ) {
        let config = StrategyConfig {
            band_distance_pct: dist,
            stop_loss_pct: Some(stop_pct),
            brokerage_fee_pct: 0.1,
            use_trailing_stop: true,
            exit_at_upper_band: false,
            adaptive: false,
            ..StrategyConfig::default()
        };
        let bars = enrich_walk(&closes);
        let result = run(config, &bars);

        for pair in result.events.chunks(2) {
            let entry = bar_index(pair[0].timestamp);
            let mut stop = pair[0].price * (1.0 - stop_pct / 100.0);
            let mut fired_at = None;

            for (k, bar) in bars.iter().enumerate().skip(entry + 1) {
                let price = bar.close();
                stop = stop.max(price * (1.0 - stop_pct / 100.0));
                if price <= stop {
                    fired_at = Some(k);
                    break;
                }
            }

            match pair.get(1) {
                Some(close) => {
                    prop_assert!(close.action != TradeAction::Sell);
                    prop_assert_eq!(fired_at, Some(bar_index(close.timestamp)));
                }
                None => prop_assert_eq!(fired_at, None),
            }
        }
    }
}

proptest! {
    /// Replays every bar prefix and reads the engine's own stop for the
    /// position open at the end of it. Within one position the stop never
    /// loosens, whichever regime adaptive mode picks on each bar.
    #[test]
    fn open_position_stop_never_loosens(
        closes in arb_closes(),
        stop_pct in 0.5..5.0_f64,
        adaptive in any::<bool>(),
        band_exit in any::<bool>(),
    ) {
        let config = StrategyConfig {
            band_distance_pct: 3.0,
            stop_loss_pct: Some(stop_pct),
            brokerage_fee_pct: 0.1,
            use_trailing_stop: true,
            exit_at_upper_band: band_exit,
            adaptive,
            ..StrategyConfig::default()
        };
        let bars = enrich_walk(&closes);
        let backtester = Backtester::new(config).unwrap();

        let mut previous: Option<(DateTime<Utc>, f64)> = None;
        for n in 1..=bars.len() {
            let result = backtester.run(MarketView::new(&bars[..n])).unwrap();
            let current = result
                .open_position
                .map(|p| (p.entry_time, p.stop_price.unwrap()));

            if let (Some((entry, stop)), Some((prev_entry, prev_stop))) = (current, previous) {
                if entry == prev_entry {
                    prop_assert!(stop >= prev_stop, "stop loosened at bar {}", n - 1);
                }
            }
            if let Some((_, stop)) = current {
                prop_assert!(bars[n - 1].close() > stop);
            }
            previous = current;
        }
    }
}

// ── 5. Determinism and indicator bounds ──────────────────────────────

proptest! {
    #[test]
    fn identical_inputs_identical_ledgers(closes in arb_closes(), config in arb_config()) {
        let bars = enrich_walk(&closes);
        let first = run(config.clone(), &bars);
        let second = run(config, &bars);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn indicators_stay_in_bounds(closes in arb_closes()) {
        let bars = enrich_walk(&closes);
        prop_assert_eq!(bars.len(), closes.len());
        prop_assert_eq!(bars[0].trend_score, 50.0);

        for bar in &bars {
            prop_assert!((0.0..=100.0).contains(&bar.trend_score));
            if let Some(band) = bar.band {
                prop_assert!(band.lower <= band.mean && band.mean <= band.upper);
                prop_assert!(band.std_dev >= 0.0);
            }
        }
        let warmed = bars.iter().filter(|b| b.band.is_some()).count();
        prop_assert_eq!(warmed, closes.len() + 1 - IndicatorConfig::default().band_period);
    }
}
