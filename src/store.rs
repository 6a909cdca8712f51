use anyhow::Context;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::signals::{pstdev, speed_ratio};

/// Latest traffic flow snapshot as persisted by the fetchers.
#[derive(Debug, Clone)]
pub struct TrafficSnapshot {
    pub ts_utc: String,
    pub current_speed_kmh: Option<f64>,
    pub freeflow_speed_kmh: Option<f64>,
}

impl TrafficSnapshot {
    pub fn ratio(&self) -> Option<f64> {
        speed_ratio(self.current_speed_kmh, self.freeflow_speed_kmh)
    }
}

pub async fn latest_traffic(pool: &SqlitePool) -> anyhow::Result<Option<TrafficSnapshot>> {
    let row = sqlx::query(
        "SELECT ts_utc, current_speed_kmh, freeflow_speed_kmh \
         FROM traffic_flow_snapshots \
         ORDER BY id DESC \
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .context("failed to read latest traffic snapshot")?;

    Ok(row.map(|r| TrafficSnapshot {
        ts_utc: r.get("ts_utc"),
        current_speed_kmh: r.get("current_speed_kmh"),
        freeflow_speed_kmh: r.get("freeflow_speed_kmh"),
    }))
}

/// Usable speed ratios over the last `minutes`, oldest first.
pub async fn recent_traffic_ratios(pool: &SqlitePool, minutes: i64) -> anyhow::Result<Vec<f64>> {
    let rows = sqlx::query(
        "SELECT current_speed_kmh, freeflow_speed_kmh \
         FROM traffic_flow_snapshots \
         WHERE ts_utc >= datetime('now', $1) \
         ORDER BY ts_utc ASC",
    )
    .bind(format!("-{minutes} minutes"))
    .fetch_all(pool)
    .await
    .context("failed to read recent traffic snapshots")?;

    let mut ratios = Vec::new();
    for row in rows {
        let current: Option<f64> = row.get("current_speed_kmh");
        let freeflow: Option<f64> = row.get("freeflow_speed_kmh");
        if let Some(ratio) = speed_ratio(current, freeflow) {
            ratios.push(ratio);
        }
    }
    Ok(ratios)
}

/// Bounded recent history for baseline derivation, newest first.
pub async fn traffic_history(
    pool: &SqlitePool,
    limit: i64,
) -> anyhow::Result<Vec<(String, Option<f64>, Option<f64>)>> {
    let rows = sqlx::query(
        "SELECT ts_utc, current_speed_kmh, freeflow_speed_kmh \
         FROM traffic_flow_snapshots \
         ORDER BY id DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to read traffic history")?;

    Ok(rows
        .into_iter()
        .map(|r| {
            (
                r.get("ts_utc"),
                r.get("current_speed_kmh"),
                r.get("freeflow_speed_kmh"),
            )
        })
        .collect())
}

/// Latest weather payload, parsed. A row whose JSON does not parse reads as
/// no data rather than an error.
pub async fn latest_weather_payload(pool: &SqlitePool) -> anyhow::Result<Option<Value>> {
    let row = sqlx::query(
        "SELECT raw_json \
         FROM weather_snapshots \
         ORDER BY id DESC \
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .context("failed to read latest weather snapshot")?;

    Ok(row.and_then(|r| {
        let raw: String = r.get("raw_json");
        serde_json::from_str(&raw).ok()
    }))
}

/// Latest point of a macro series: (period, value).
pub async fn latest_macro_point(
    pool: &SqlitePool,
    series_code: &str,
) -> anyhow::Result<Option<(String, f64)>> {
    let row = sqlx::query(
        "SELECT period, value \
         FROM macro_series_points \
         WHERE series_code = $1 \
         ORDER BY id DESC \
         LIMIT 1",
    )
    .bind(series_code)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to read macro series {series_code}"))?;

    Ok(row.and_then(|r| {
        let value: Option<f64> = r.get("value");
        value.map(|v| (r.get("period"), v))
    }))
}

/// Std dev of daily series levels over the last `window_days` vs the last
/// `baseline_days`. Absent until enough history has accumulated.
pub async fn fx_volatility(
    pool: &SqlitePool,
    series_code: &str,
    window_days: usize,
    baseline_days: i64,
) -> anyhow::Result<Option<(f64, f64)>> {
    let rows = sqlx::query(
        "SELECT period, value \
         FROM macro_series_points \
         WHERE series_code = $1 \
         ORDER BY period DESC \
         LIMIT $2",
    )
    .bind(series_code)
    .bind(baseline_days)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to read macro series {series_code}"))?;

    if rows.len() < 10.max(window_days / 2) {
        return Ok(None);
    }

    let values: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.get::<Option<f64>, _>("value"))
        .collect();

    let vol_baseline = pstdev(&values);
    let vol_window = if values.len() >= window_days {
        pstdev(&values[..window_days])
    } else {
        pstdev(&values)
    };
    Ok(Some((vol_window, vol_baseline)))
}
