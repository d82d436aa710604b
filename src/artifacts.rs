//! Metrics & Artifacts writer (§4.K) and determinism verifier (§4.N).
//! A single writer owns every output stream for a run and flushes at the
//! end to guarantee atomicity (§9 design notes); the run directory is named
//! by the `blake3` hash of the canonicalized manifest bytes (§6.3).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use polars::prelude::{DataFrame, IntoLazy, NamedFrom, ParquetWriter, Series, SortMultipleOptions};
use serde::{Deserialize, Serialize};

use crate::bar_processor::RunReport;
use crate::error::{ArtifactError, EngineResult};
use crate::exchange::types::Trade;
use crate::metrics::{compute_metrics, MetricsRecord};

/// Everything that determines the content hash of a run, laid out with
/// sorted keys and fixed precision so two runs of the same Play over the
/// same data hash identically (§4.K, §8.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub play_name: String,
    pub play_hash: String,
    pub pipeline_version: String,
    pub symbol: String,
    pub bar_range_start_ms: i64,
    pub bar_range_end_ms: i64,
    pub sim_start_idx: usize,
    pub sim_end_idx: usize,
    pub seed: Option<u64>,
    /// Wall-clock stamp, excluded from the determinism comparison (§8.6)
    /// but still recorded for humans reading the manifest.
    pub generated_at_ms: i64,
}

impl Manifest {
    /// Canonical bytes used for both the content-address hash and the
    /// on-disk `manifest.json`: sorted keys, fixed precision, UTF-8 JSON.
    /// `generated_at_ms` is zeroed before hashing so determinism holds
    /// across repeated runs regardless of wall-clock time (§8.6).
    pub fn canonical_bytes_for_hash(&self) -> EngineResult<Vec<u8>> {
        let mut for_hash = self.clone();
        for_hash.generated_at_ms = 0;
        let value = serde_json::to_value(&for_hash).map_err(|e| ArtifactError::Hashing(e.to_string()))?;
        let sorted = sort_json_keys(value);
        serde_json::to_vec(&sorted).map_err(|e| ArtifactError::Hashing(e.to_string()).into())
    }

    pub fn content_hash(&self) -> EngineResult<String> {
        let bytes = self.canonical_bytes_for_hash()?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// Recursively sorts object keys so JSON serialization is byte-stable
/// regardless of struct field declaration order changes upstream.
fn sort_json_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_json_keys(v))).collect();
            serde_json::to_value(sorted).unwrap()
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(sort_json_keys).collect()),
        other => other,
    }
}

fn trades_to_dataframe(trades: &[Trade]) -> EngineResult<DataFrame> {
    let ids: Vec<u64> = trades.iter().map(|t| t.id).collect();
    let sides: Vec<&str> = trades.iter().map(|t| if t.side == crate::domain::TradeSide::Long { "long" } else { "short" }).collect();
    let entry_price: Vec<f64> = trades.iter().map(|t| t.entry_price).collect();
    let exit_price: Vec<f64> = trades.iter().map(|t| t.exit_price).collect();
    let qty: Vec<f64> = trades.iter().map(|t| t.qty).collect();
    let entry_ts: Vec<i64> = trades.iter().map(|t| t.entry_ts).collect();
    let exit_ts: Vec<i64> = trades.iter().map(|t| t.exit_ts).collect();
    let entry_fee: Vec<f64> = trades.iter().map(|t| t.entry_fee).collect();
    let exit_fee: Vec<f64> = trades.iter().map(|t| t.exit_fee).collect();
    let funding: Vec<f64> = trades.iter().map(|t| t.funding_paid).collect();
    let realized_pnl: Vec<f64> = trades.iter().map(|t| t.realized_pnl).collect();
    let exit_reason: Vec<String> = trades.iter().map(|t| t.exit_reason.to_string()).collect();
    let mae: Vec<f64> = trades.iter().map(|t| t.mae).collect();
    let mfe: Vec<f64> = trades.iter().map(|t| t.mfe).collect();
    let leverage: Vec<f64> = trades.iter().map(|t| t.leverage).collect();

    DataFrame::new(vec![
        Series::new("id".into(), ids).into(),
        Series::new("side".into(), sides).into(),
        Series::new("entry_price".into(), entry_price).into(),
        Series::new("exit_price".into(), exit_price).into(),
        Series::new("qty".into(), qty).into(),
        Series::new("entry_ts".into(), entry_ts).into(),
        Series::new("exit_ts".into(), exit_ts).into(),
        Series::new("entry_fee".into(), entry_fee).into(),
        Series::new("exit_fee".into(), exit_fee).into(),
        Series::new("funding_paid".into(), funding).into(),
        Series::new("realized_pnl".into(), realized_pnl).into(),
        Series::new("exit_reason".into(), exit_reason).into(),
        Series::new("mae".into(), mae).into(),
        Series::new("mfe".into(), mfe).into(),
        Series::new("leverage".into(), leverage).into(),
    ])
    .map_err(|e| ArtifactError::Parquet(e.to_string()).into())
}

fn equity_to_dataframe(report: &RunReport) -> EngineResult<DataFrame> {
    let ts: Vec<i64> = report.equity_curve.iter().map(|p| p.ts).collect();
    let equity: Vec<f64> = report.equity_curve.iter().map(|p| p.equity).collect();
    DataFrame::new(vec![Series::new("ts_close".into(), ts).into(), Series::new("equity".into(), equity).into()])
        .map_err(|e| ArtifactError::Parquet(e.to_string()).into())
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> EngineResult<()> {
    // Sort by the leading time column so byte layout is deterministic
    // independent of any upstream ordering instability (§8.6).
    let sort_col = if df.get_column_names().iter().any(|c| c.as_str() == "entry_ts") { "entry_ts" } else { "ts_close" };
    *df = df
        .clone()
        .lazy()
        .sort([sort_col], SortMultipleOptions::default())
        .collect()
        .map_err(|e| ArtifactError::Parquet(e.to_string()))?;
    let file = File::create(path).map_err(|e| ArtifactError::Write { name: path.display().to_string(), source: e })?;
    ParquetWriter::new(file).finish(df).map_err(|e| ArtifactError::Parquet(e.to_string()))?;
    Ok(())
}

/// Writes the full §6.3 artifact layout under
/// `<runs_root>/<play_id>/<symbol>/<run_id>/` and returns the directory.
pub fn write_run_artifacts(
    runs_root: &Path,
    play_name: &str,
    symbol: &str,
    manifest: &Manifest,
    report: &RunReport,
    metrics: &MetricsRecord,
) -> EngineResult<PathBuf> {
    let run_id = manifest.content_hash()?;
    let dir = runs_root.join(play_name).join(symbol).join(&run_id);
    fs::create_dir_all(&dir).map_err(|e| ArtifactError::Write { name: dir.display().to_string(), source: e })?;

    let manifest_bytes =
        serde_json::to_vec_pretty(manifest).map_err(|e| ArtifactError::Hashing(e.to_string()))?;
    fs::write(dir.join("manifest.json"), manifest_bytes)
        .map_err(|e| ArtifactError::Write { name: "manifest.json".into(), source: e })?;

    let metrics_bytes = serde_json::to_vec_pretty(metrics).map_err(|e| ArtifactError::Hashing(e.to_string()))?;
    fs::write(dir.join("metrics.json"), metrics_bytes)
        .map_err(|e| ArtifactError::Write { name: "metrics.json".into(), source: e })?;

    let mut trades_df = trades_to_dataframe(&report.trades)?;
    write_parquet(&mut trades_df, &dir.join("trades.parquet"))?;

    let mut equity_df = equity_to_dataframe(report)?;
    write_parquet(&mut equity_df, &dir.join("equity.parquet"))?;

    let mut events_file = File::create(dir.join("events.jsonl"))
        .map_err(|e| ArtifactError::Write { name: "events.jsonl".into(), source: e })?;
    for line in &report.events {
        writeln!(events_file, "{line}").map_err(|e| ArtifactError::Write { name: "events.jsonl".into(), source: e })?;
    }

    Ok(dir)
}

/// Content hashes of the parts of a run that must match bit-for-bit across
/// repeated runs of the same Play over the same data (§8.6), excluding the
/// manifest's wall-clock field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHashes {
    pub manifest_hash: String,
    pub trades_hash: String,
    pub equity_hash: String,
    pub metrics_hash: String,
}

fn hash_df(df: &DataFrame) -> EngineResult<String> {
    // Re-derive canonical bytes from the sorted frame directly rather than
    // hashing the parquet file (whose footer/codec metadata may legitimately
    // differ run-to-run while content is identical).
    let sorted = df
        .clone()
        .lazy()
        .sort(df.get_column_names_owned().iter().map(|s| s.as_str()).take(1).collect::<Vec<_>>(), SortMultipleOptions::default())
        .collect()
        .map_err(|e| ArtifactError::Parquet(e.to_string()))?;
    let mut buf = Vec::new();
    for name in sorted.get_column_names() {
        let column = sorted.column(name).map_err(|e| ArtifactError::Parquet(e.to_string()))?;
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(format!("{column:?}").as_bytes());
    }
    Ok(blake3::hash(&buf).to_hex().to_string())
}

pub fn hash_run(manifest: &Manifest, report: &RunReport, metrics: &MetricsRecord) -> EngineResult<RunHashes> {
    let trades_df = trades_to_dataframe(&report.trades)?;
    let equity_df = equity_to_dataframe(report)?;
    let metrics_bytes = serde_json::to_vec(metrics).map_err(|e| ArtifactError::Hashing(e.to_string()))?;
    Ok(RunHashes {
        manifest_hash: manifest.content_hash()?,
        trades_hash: hash_df(&trades_df)?,
        equity_hash: hash_df(&equity_df)?,
        metrics_hash: blake3::hash(&metrics_bytes).to_hex().to_string(),
    })
}

/// §4.N: re-runs the same `(play, data)` pair `n_runs` times and asserts
/// byte-identical artifact hashes (excluding the manifest's wall-clock
/// field), returning a structured report instead of panicking so a harness
/// can aggregate determinism failures across many Plays.
#[derive(Debug, Clone)]
pub struct DeterminismReport {
    pub n_runs: usize,
    pub all_identical: bool,
    pub mismatches: Vec<(usize, usize, String)>,
}

pub fn verify_determinism<F>(mut run_once: F, n_runs: usize) -> EngineResult<DeterminismReport>
where
    F: FnMut() -> EngineResult<(Manifest, RunReport, MetricsRecord)>,
{
    let mut hashes = Vec::with_capacity(n_runs);
    for _ in 0..n_runs {
        let (manifest, report, metrics) = run_once()?;
        hashes.push(hash_run(&manifest, &report, &metrics)?);
    }

    let mut mismatches = Vec::new();
    for i in 1..hashes.len() {
        if hashes[i] != hashes[0] {
            let field = if hashes[i].trades_hash != hashes[0].trades_hash {
                "trades.parquet"
            } else if hashes[i].equity_hash != hashes[0].equity_hash {
                "equity.parquet"
            } else if hashes[i].metrics_hash != hashes[0].metrics_hash {
                "metrics.json"
            } else {
                "manifest.json"
            };
            mismatches.push((0, i, field.to_string()));
        }
    }

    Ok(DeterminismReport { n_runs, all_identical: mismatches.is_empty(), mismatches })
}

/// Computes a run's full metrics record straight from a `RunReport`;
/// convenience wrapper so callers don't import `metrics::compute_metrics`
/// directly for the common case.
pub fn metrics_for_report(report: &RunReport, exec_tf_minutes: u32) -> MetricsRecord {
    compute_metrics(report, exec_tf_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar_processor::EquityPoint;

    fn sample_manifest() -> Manifest {
        Manifest {
            play_name: "test".into(),
            play_hash: "abc123".into(),
            pipeline_version: "v3.0.0".into(),
            symbol: "BTCUSDT".into(),
            bar_range_start_ms: 0,
            bar_range_end_ms: 1000,
            sim_start_idx: 0,
            sim_end_idx: 10,
            seed: Some(7),
            generated_at_ms: 123,
        }
    }

    #[test]
    fn manifest_hash_ignores_generated_at_ms() {
        let mut a = sample_manifest();
        let mut b = sample_manifest();
        b.generated_at_ms = 999_999;
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
        a.symbol = "ETHUSDT".into();
        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn determinism_verifier_detects_divergent_runs() {
        let mut call = 0usize;
        let report_for = |pnl: f64| RunReport {
            trades: vec![],
            equity_curve: vec![EquityPoint { ts: 0, equity: 10_000.0 + pnl }],
            events: vec![],
            starting_equity: 10_000.0,
            final_equity: 10_000.0 + pnl,
            sim_start_idx: 0,
            sim_end_idx: 0,
            total_funding_paid: 0.0,
            mmr_distance_pct: vec![None],
        };
        let result = verify_determinism(
            || {
                call += 1;
                let report = report_for(if call == 2 { 1.0 } else { 0.0 });
                let metrics = compute_metrics(&report, 15);
                Ok((sample_manifest(), report, metrics))
            },
            3,
        )
        .unwrap();
        assert!(!result.all_identical);
        assert!(!result.mismatches.is_empty());
    }

    #[test]
    fn determinism_verifier_confirms_identical_runs() {
        let result = verify_determinism(
            || {
                let report = RunReport {
                    trades: vec![],
                    equity_curve: vec![EquityPoint { ts: 0, equity: 10_000.0 }],
                    events: vec![],
                    starting_equity: 10_000.0,
                    final_equity: 10_000.0,
                    sim_start_idx: 0,
                    sim_end_idx: 0,
                    total_funding_paid: 0.0,
                    mmr_distance_pct: vec![None],
                };
                let metrics = compute_metrics(&report, 15);
                Ok((sample_manifest(), report, metrics))
            },
            3,
        )
        .unwrap();
        assert!(result.all_identical);
    }
}
