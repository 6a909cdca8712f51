use std::path::Path;

use anyhow::bail;
use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde_json::json;
use sqlx::SqlitePool;

use crate::config::SiteConfig;
use crate::models::{
    Card, Confidence, ConfidenceLabel, Driver, Effort, ImpactTier, Insight, Status,
    SuggestedAction, CARD_SCHEMA_VERSION,
};
use crate::scorers::{impact_label, scale_raw_score, write_card};
use crate::severity::{classify, Level, Thresholds};
use crate::signals::{
    baseline_ratio, bucket_15min, outlook_next_3h, parse_dt, rain_now, ratio_volatility, Outlook,
};
use crate::store;

const HISTORY_LIMIT: i64 = 2000;

/// Positive deviation means worse-than-normal traffic (the baseline ratio is
/// higher than the current one). Without an established baseline the fallback
/// is a conservative fraction of raw congestion; 0.2 is a documented magic
/// constant from the v1 heuristic.
pub fn deviation_from_baseline(current_ratio: Option<f64>, baseline: Option<f64>) -> f64 {
    match (current_ratio, baseline) {
        (Some(cur), Some(base)) => (base - cur).max(0.0),
        (Some(cur), None) => 0.2 * (1.0 - cur).max(0.0),
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReservationParts {
    pub deviation: f64,
    pub volatility: f64,
    pub rain_now: bool,
    pub is_peak: bool,
}

pub fn score_reservation(parts: &ReservationParts) -> i64 {
    let mut raw = 0.0;
    raw += parts.deviation.max(0.0) * 3.0;
    raw += parts.volatility.max(0.0) * 2.0;
    if parts.rain_now {
        raw += 0.6;
    }
    if parts.is_peak {
        raw += 0.6;
    }
    scale_raw_score(raw)
}

pub struct ReservationContext {
    pub current_ratio: Option<f64>,
    pub baseline: Option<f64>,
    pub have_weather: bool,
    pub rain_reason: String,
    pub outlook: Option<Outlook>,
}

pub fn build_card(
    cfg: &SiteConfig,
    thresholds: &Thresholds,
    ctx: &ReservationContext,
    parts: &ReservationParts,
    dt_local: DateTime<FixedOffset>,
) -> Card {
    let score = score_reservation(parts);
    let level = classify(score, thresholds);

    let in_service = cfg.service_window.contains_hour(dt_local.hour());

    let (confidence, confidence_reason) = match (ctx.baseline.is_some(), ctx.have_weather) {
        (false, false) => (
            ConfidenceLabel::Low,
            "Traffic baseline is not established yet and weather context is missing; insight is primarily heuristic.",
        ),
        (false, true) => (
            ConfidenceLabel::Medium,
            "Traffic baseline is not established yet; comparison is a conservative proxy until more history accumulates.",
        ),
        (true, false) => (
            ConfidenceLabel::Medium,
            "Traffic baseline is available but weather context is missing; confidence is reduced.",
        ),
        (true, true) => (
            if parts.volatility < 0.08 {
                ConfidenceLabel::High
            } else {
                ConfidenceLabel::Medium
            },
            "Traffic baseline and weather context are available; confidence depends on short-term volatility.",
        ),
    };

    let rain_risk = parts.rain_now || ctx.outlook.is_some_and(|o| o.rain_likely);
    let drivers = vec![
        Driver {
            label: "Traffic vs baseline".to_string(),
            impact: impact_label(parts.deviation, 0.02, 0.06),
        },
        Driver {
            label: "Short-term volatility (60m)".to_string(),
            impact: impact_label(parts.volatility, 0.06, 0.12),
        },
        Driver {
            label: "Rain amplification risk".to_string(),
            impact: if rain_risk {
                ImpactTier::Medium
            } else {
                ImpactTier::Low
            },
        },
        Driver {
            label: "Peak-hour sensitivity".to_string(),
            impact: if parts.is_peak {
                ImpactTier::Medium
            } else {
                ImpactTier::Low
            },
        },
        Driver {
            label: "Large-group sensitivity (>=5)".to_string(),
            impact: ImpactTier::Medium,
        },
    ];

    let summary = if level != Level::Normal {
        "Arrival times are less predictable than usual, increasing the risk of overlapping reservations during peak service hours."
    } else {
        "Arrival timing risk appears stable, but uncertainty can increase if traffic volatility or rain rises."
    };

    let outlook_text = match &ctx.outlook {
        None => "Outlook (0–3h): No short-term outlook available.",
        Some(o) if o.rain_likely && level != Level::Normal => {
            "Outlook (0–3h): Elevated conditions may persist; rain risk could continue to amplify arrival variability."
        }
        Some(o) if o.rain_likely => {
            "Outlook (0–3h): Conditions look normal, but rain risk could increase arrival variability later."
        }
        Some(_) => "Outlook (0–3h): Conditions are likely to remain similar in the near term.",
    };

    let mut suggested_actions = vec![
        SuggestedAction {
            action: "Add a buffer for groups of 5+ during the next 3 hours".to_string(),
            when: "Any booking in the next 3 hours for 5+ guests".to_string(),
            why: "Large groups create longer seating/ordering latency and amplify small arrival delays."
                .to_string(),
            effort: Effort::Low,
            tradeoff: "Slightly fewer slots, smoother flow".to_string(),
        },
        SuggestedAction {
            action: "Proactively confirm late arrivals with a soft message".to_string(),
            when: "10–15 minutes before reservation time".to_string(),
            why: "Reduces uncertainty and helps resequence tables if someone is running late."
                .to_string(),
            effort: Effort::Low,
            tradeoff: "Adds messaging workload".to_string(),
        },
    ];

    if parts.volatility >= 0.08 || parts.deviation >= 0.06 || level == Level::Elevated {
        suggested_actions.push(SuggestedAction {
            action: "Avoid tight back-to-back reservations during peak window".to_string(),
            when: format!("During peak window ({})", cfg.peak_window.label()),
            why: "When arrivals cluster, tighter sequencing increases queue spillover risk."
                .to_string(),
            effort: Effort::Medium,
            tradeoff: "May reduce peak throughput, improves experience".to_string(),
        });
    }

    let window = cfg.service_window_local();
    let subtitle = if !in_service {
        format!(
            "Off-hours: informational snapshot (service window {}–{})",
            window.start, window.end
        )
    } else if ctx.baseline.is_some() {
        "Compared to a normal evening".to_string()
    } else {
        "Compared to recent external conditions".to_string()
    };

    let internal = json!({
        "traffic": {
            "current_ratio": ctx.current_ratio,
            "baseline_ratio": ctx.baseline,
            "deviation": parts.deviation,
            "volatility_60m": parts.volatility,
        },
        "weather": {
            "rain_now": parts.rain_now,
            "rain_reason": ctx.rain_reason,
            "max_pop_next_3h": ctx.outlook.map(|o| o.max_pop),
        },
        "flags": {
            "is_peak_window": parts.is_peak,
            "is_in_service_window": in_service,
        },
    });

    Card {
        schema_version: CARD_SCHEMA_VERSION.to_string(),
        site_id: cfg.site_id.clone(),
        site_name: cfg.site_name.clone(),
        generated_at_local: dt_local.to_rfc3339(),
        service_window_local: window,
        insight: Insight {
            id: "reservation_flow_risk".to_string(),
            title: "Reservation Flow Risk".to_string(),
            category: "Reservations".to_string(),
            time_horizon: "0–3h".to_string(),
            status: Status {
                level,
                icon: level.icon().to_string(),
                score_0_100: score,
                subtitle,
                confidence: Confidence::Label(confidence),
                confidence_reason: confidence_reason.to_string(),
            },
            summary: summary.to_string(),
            drivers,
            implications: vec![
                "Higher likelihood of reservation overlap and queue spillover during peak hours."
                    .to_string(),
                "Greater sensitivity to delays for larger groups.".to_string(),
            ],
            supported_considerations: vec![
                "Wider buffers for larger groups may reduce cascading delays.".to_string(),
                "Greater flexibility during peak windows may be more valuable than usual."
                    .to_string(),
                "Proactive expectation-setting may reduce frustration if delays occur.".to_string(),
            ],
            suggested_actions,
            outlook: Some(outlook_text.to_string()),
            trust_note:
                "This insight is based entirely on external conditions (traffic, weather, timing, location). No internal reservation or customer data is used."
                    .to_string(),
        },
        internal: Some(internal),
    }
}

pub async fn run(
    pool: &SqlitePool,
    cfg: &SiteConfig,
    thresholds: &Thresholds,
    out: &Path,
) -> anyhow::Result<()> {
    let Some(traffic) = store::latest_traffic(pool).await? else {
        bail!("no traffic snapshots in the signal store; cannot score reservation-flow risk");
    };

    let Some(dt_utc) = parse_dt(&traffic.ts_utc) else {
        bail!("latest traffic snapshot has an unparsable timestamp: {}", traffic.ts_utc);
    };
    let offset = cfg.local_offset();
    let dt_local = dt_utc.with_timezone(&offset);

    let history = store::traffic_history(pool, HISTORY_LIMIT).await?;
    let baseline = baseline_ratio(
        &history,
        dt_local.weekday(),
        bucket_15min(&dt_local),
        offset,
    );

    let current_ratio = traffic.ratio();
    let deviation = deviation_from_baseline(current_ratio, baseline);

    let ratios = store::recent_traffic_ratios(pool, 60).await?;
    let volatility = ratio_volatility(&ratios);

    let weather = store::latest_weather_payload(pool).await?;
    let (raining, rain_reason) = rain_now(weather.as_ref());
    let outlook = outlook_next_3h(weather.as_ref());

    let parts = ReservationParts {
        deviation,
        volatility,
        rain_now: raining,
        is_peak: cfg.peak_window.contains_hour(dt_local.hour()),
    };
    let ctx = ReservationContext {
        current_ratio,
        baseline,
        have_weather: weather.is_some(),
        rain_reason,
        outlook,
    };

    let card = build_card(cfg, thresholds, &ctx, &parts, dt_local);
    write_card(&card, out)?;
    println!("Reservation-flow card written to {}.", out.display());
    Ok(())
}
