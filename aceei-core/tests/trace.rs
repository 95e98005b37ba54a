//! Trace tables recorded by the instrument subscriber during a run.

#![cfg(feature = "instrument")]

use std::collections::HashMap;

use polars::prelude::*;

use aceei_core::instrument;
use aceei_core::{Aceei, AceeiConfig, Agent, AgentId, Budget};

fn col_f64(df: &DataFrame, name: &str) -> Vec<f64> {
    df.column(name)
        .unwrap()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect()
}

fn two_by_two() -> Aceei {
    let agents = vec![
        Agent::new(AgentId(0), vec![10.0, 1.0]),
        Agent::new(AgentId(1), vec![1.0, 10.0]),
    ];
    let budgets: HashMap<AgentId, Budget> = [(AgentId(0), 1.0), (AgentId(1), 1.0)].into_iter().collect();
    let config = AceeiConfig::default()
        .with_delta(0.02)
        .with_epsilon(0.05)
        .with_tol(1e-6)
        .with_max_iter(200)
        .with_demand_workers(2);
    Aceei::new(agents, vec![1.0, 1.0], &budgets, config).unwrap()
}

#[test]
fn every_iteration_is_recorded() {
    instrument::install_subscriber();
    instrument::clear();

    let outcome = two_by_two().run().unwrap();
    let recorder = instrument::drain();
    let iterations = outcome.iterations();

    let table = recorder.table("aceei_iteration").unwrap();
    assert_eq!(table.row_count(), iterations);
    let errors = table.f64s("clearing_error").unwrap();
    for (row, summary) in errors.iter().zip(&outcome.history) {
        assert_eq!(*row, summary.clearing_error);
    }
    assert!(table.bools("full_rescreen").unwrap()[0]);

    assert_eq!(recorder.table("aceei_choice").unwrap().row_count(), 2 * iterations);
    assert_eq!(recorder.table("aceei_price").unwrap().row_count(), 2 * iterations);

    let run = recorder.table("aceei_run").unwrap();
    assert_eq!(run.row_count(), 1);
    assert_eq!(run.strs("termination").unwrap()[0], "converged");
    assert_eq!(run.u64s("iterations").unwrap()[0], iterations as u64);
}

#[test]
fn chosen_budgets_stay_in_window_every_iteration() {
    instrument::install_subscriber();
    instrument::clear();

    two_by_two().run().unwrap();
    let choices = instrument::drain().table("aceei_choice").unwrap().to_dataframe().unwrap();

    for budget in col_f64(&choices, "budget") {
        assert!((0.95 - 1e-9..=1.05 + 1e-9).contains(&budget), "budget {budget}");
    }
    for (lower, upper) in col_f64(&choices, "budget_lower")
        .into_iter()
        .zip(col_f64(&choices, "budget"))
    {
        assert!(lower <= upper);
    }
}

#[test]
fn every_item_gets_priced() {
    instrument::install_subscriber();
    instrument::clear();

    two_by_two().run().unwrap();
    let dfs = instrument::drain_to_dataframes();
    let prices = dfs.get("aceei_price").unwrap();

    let by_item = prices
        .clone()
        .lazy()
        .group_by([col("item")])
        .agg([col("price").max().alias("max_price")])
        .sort(["item"], Default::default())
        .collect()
        .unwrap();

    // Both items start over-demanded at zero prices
    let max_prices = col_f64(&by_item, "max_price");
    assert_eq!(max_prices.len(), 2);
    for max_price in max_prices {
        assert!(max_price > 0.0);
    }
}

#[test]
fn scoped_recorder_writes_run_tables_on_drop() {
    let parent = std::env::temp_dir().join(format!("aceei_trace_{}", std::process::id()));

    let run_dir = {
        let mut rec = instrument::ScopedRecorder::new(parent.clone(), "two by two");
        two_by_two().run().unwrap();
        let dfs = rec.get();
        assert!(dfs.contains_key("aceei_iteration"));
        assert!(dfs.contains_key("aceei_price"));
        rec.run_dir().to_path_buf()
    };

    assert!(run_dir.starts_with(&parent));
    assert!(run_dir.to_string_lossy().ends_with("_two_by_two"));
    for table in ["aceei_iteration", "aceei_choice", "aceei_price", "aceei_run"] {
        assert!(run_dir.join(format!("{table}.parquet")).is_file(), "{table}.parquet missing");
    }
    assert!(run_dir.join("_ready").is_file());

    let _ = std::fs::remove_dir_all(&parent);
}
