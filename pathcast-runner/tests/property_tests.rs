//! Property tests for back-test aggregation and the search's acceptance rule.
//!
//! Uses proptest to verify:
//! 1. Weekly windows are evenly spaced, inside the range, and never miss the last week
//! 2. Aggregation keeps every row but each table's first, in table order
//! 3. Acceptance is irreflexive and asymmetric

use chrono::{Duration, NaiveDate, NaiveDateTime};
use pathcast_runner::{aggregate, is_better_combination, window_starts, SimulationRow, SimulationTable};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_day() -> impl Strategy<Value = NaiveDateTime> {
    (0i64..8000).prop_map(|offset| {
        NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::days(offset)
    })
}

fn arb_table() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.5..2.0_f64, 0.5..2.0_f64), 0..10)
}

fn arb_score() -> impl Strategy<Value = (f64, f64, f64)> {
    (0.0..1.0_f64, 0.001..0.1_f64, 0.51..1.0_f64)
}

fn to_table(prices: &[(f64, f64)], offset: i64) -> SimulationTable {
    SimulationTable {
        name: format!("window{offset}"),
        rows: prices
            .iter()
            .enumerate()
            .map(|(i, &(real, simulated))| SimulationRow {
                end_time: offset + i as i64,
                real_price: Some(real),
                simulated_price: simulated,
            })
            .collect(),
        outlook: None,
    }
}

// ── 1. Windows ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn windows_tile_the_range(start in arb_day(), span in 0i64..400, days in 1u32..15) {
        let end = start + Duration::days(span);
        let starts = window_starts(start, end, days);

        prop_assert_eq!(starts.first().copied(), Some(start));
        prop_assert_eq!(starts.len() as i64, span / i64::from(days) + 1);
        for pair in starts.windows(2) {
            prop_assert_eq!(pair[1] - pair[0], Duration::days(i64::from(days)));
        }
        let last = *starts.last().unwrap();
        prop_assert!(last <= end);
        prop_assert!(last + Duration::days(i64::from(days)) > end);
    }
}

// ── 2. Aggregation ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn aggregation_drops_only_first_rows(tables in prop::collection::vec(arb_table(), 0..6)) {
        let built: Vec<SimulationTable> = tables
            .iter()
            .enumerate()
            .map(|(k, t)| to_table(t, k as i64 * 100))
            .collect();
        let rows = aggregate(&built);

        let expected: usize = tables.iter().map(|t| t.len().saturating_sub(1)).sum();
        prop_assert_eq!(rows.len(), expected);
        prop_assert!(rows.windows(2).all(|w| w[0].end_time < w[1].end_time));
        for row in &rows {
            prop_assert!((row.simulated_price / row.real_price - 1.0 - row.p_difference).abs() < 1e-12);
        }
    }
}

// ── 3. Acceptance ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn acceptance_is_a_strict_order(a in arb_score(), b in arb_score()) {
        prop_assert!(!is_better_combination(a, a));
        prop_assert!(!(is_better_combination(a, b) && is_better_combination(b, a)));
    }
}
