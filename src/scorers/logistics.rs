use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::json;
use sqlx::SqlitePool;

use crate::config::SiteConfig;
use crate::models::{
    Card, Confidence, Driver, Effort, Insight, Status, SuggestedAction, CARD_SCHEMA_VERSION,
};
use crate::scorers::{clamp01, impact_label, write_card};
use crate::severity::{classify, Level, Thresholds};
use crate::store;

const FX_WINDOW_DAYS: usize = 30;
const FX_BASELINE_DAYS: i64 = 180;

// Neutral-low defaults for missing signals: not zero, to avoid reading
// absence as certainty of calm.
const DEFAULT_FOOD_PRESSURE: f64 = 0.25;
const DEFAULT_TRANSPORT_PRESSURE: f64 = 0.25;
const DEFAULT_FX_PRESSURE: f64 = 0.20;

/// Map YoY food inflation into 0..1 pressure (~2% low, ~8% high).
pub fn food_pressure(food_yoy: f64) -> f64 {
    clamp01((food_yoy - 2.0) / 6.0)
}

/// Map transport inflation variation into 0..1 pressure (~1% low, ~7% high).
pub fn transport_pressure(transport_var: f64) -> f64 {
    clamp01((transport_var - 1.0) / 6.0)
}

/// Pressure rises when short-window FX volatility runs above baseline
/// (ratio 1.0 normal, 1.8+ high).
pub fn fx_pressure(vol_window: f64, vol_baseline: f64) -> f64 {
    if vol_baseline <= 0.0 {
        return if vol_window > 0.0 { 0.25 } else { 0.0 };
    }
    clamp01((vol_window / vol_baseline - 1.0) / 0.8)
}

/// Fixed v1 weights over the three pressures, each falling back to its
/// neutral-low default when the source signal is absent. The floor of 5 with
/// two or more live signals is a documented magic constant: "ran and found
/// nothing" should not render as a flat zero.
pub fn score_logistics(
    food: Option<f64>,
    transport: Option<f64>,
    fx: Option<f64>,
) -> (i64, usize) {
    let signals_available =
        [food.is_some(), transport.is_some(), fx.is_some()].iter().filter(|b| **b).count();

    let food_p = food.unwrap_or(DEFAULT_FOOD_PRESSURE);
    let transport_p = transport.unwrap_or(DEFAULT_TRANSPORT_PRESSURE);
    let fx_p = fx.unwrap_or(DEFAULT_FX_PRESSURE);

    let weighted = 0.45 * food_p + 0.35 * transport_p + 0.20 * fx_p;
    let mut score = (100.0 * clamp01(weighted)).round() as i64;
    if signals_available >= 2 && score < 5 {
        score = 5;
    }
    (score, signals_available)
}

/// Confidence grows with live signals: 1 => ~0.55, 2 => ~0.70, 3 => ~0.85.
pub fn confidence_from_signals(signals_available: usize) -> f64 {
    if signals_available == 0 {
        return 0.35;
    }
    let raw = (0.40 + 0.15 * signals_available as f64).min(0.90);
    (raw * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default)]
pub struct MacroPressures {
    pub food: Option<f64>,
    pub transport: Option<f64>,
    pub fx: Option<f64>,
    pub confidence_reasons: Vec<String>,
}

pub fn build_card(
    cfg: &SiteConfig,
    thresholds: &Thresholds,
    pressures: &MacroPressures,
    now_local: DateTime<FixedOffset>,
) -> Card {
    let (score, signals_available) =
        score_logistics(pressures.food, pressures.transport, pressures.fx);
    let level = classify(score, thresholds);

    let subtitle = match level {
        Level::Normal => "External cost signals look stable.",
        Level::Watch => "Some upstream cost pressure is building.",
        Level::Elevated => "Upstream logistics costs are rising faster than usual.",
        Level::Critical => "High cost pressure: expect faster repricing and tighter margins.",
    };

    let mut drivers = Vec::new();
    if let Some(p) = pressures.food {
        drivers.push(Driver {
            label: "Food inflation pressure (12m trend)".to_string(),
            impact: impact_label(p, 0.35, 0.60),
        });
    }
    if let Some(p) = pressures.transport {
        drivers.push(Driver {
            label: "Transport cost pressure (recent inflation trend)".to_string(),
            impact: impact_label(p, 0.35, 0.60),
        });
    }
    if let Some(p) = pressures.fx {
        drivers.push(Driver {
            label: "FX volatility vs baseline".to_string(),
            impact: impact_label(p, 0.35, 0.60),
        });
    }
    if drivers.is_empty() {
        drivers.push(Driver {
            label: "Limited signals available; using conservative defaults".to_string(),
            impact: crate::models::ImpactTier::Low,
        });
    }

    let confidence = confidence_from_signals(signals_available);
    let confidence_reason = pressures.confidence_reasons.join(" ");

    let internal = json!({
        "pressures": {
            "food": pressures.food,
            "transport": pressures.transport,
            "fx": pressures.fx,
        },
        "signals_available": signals_available,
    });

    Card {
        schema_version: CARD_SCHEMA_VERSION.to_string(),
        site_id: cfg.site_id.clone(),
        site_name: cfg.site_name.clone(),
        generated_at_local: now_local.to_rfc3339(),
        service_window_local: cfg.service_window_local(),
        insight: Insight {
            id: "logistics_cost_pressure_risk".to_string(),
            title: "Logistics Cost Pressure Risk".to_string(),
            category: "Logistics".to_string(),
            time_horizon: "7–30d".to_string(),
            status: Status {
                level,
                icon: level.icon().to_string(),
                score_0_100: score,
                subtitle: subtitle.to_string(),
                confidence: Confidence::Fraction(confidence),
                confidence_reason,
            },
            summary:
                "External indicators (food inflation, transport cost pressure, and FX volatility) suggest how likely suppliers are to reprice or tighten terms in the coming weeks."
                    .to_string(),
            drivers,
            implications: vec![
                "Higher cost pressure can reduce price-lock windows and increase quote variability."
                    .to_string(),
                "Margin sensitivity rises on imported or freight-heavy inputs during Elevated/Critical periods."
                    .to_string(),
            ],
            supported_considerations: vec![
                "Focus on menu-margin awareness rather than predicting exact ingredient costs."
                    .to_string(),
                "Be cautious with promo commitments that depend on volatile inputs when risk is Elevated/Critical."
                    .to_string(),
                "Re-check supplier quotes closer to order time during higher-pressure periods."
                    .to_string(),
            ],
            suggested_actions: vec![
                SuggestedAction {
                    action: "Review margin exposure on high-cost dishes".to_string(),
                    when: "If status is Elevated/Critical".to_string(),
                    why: "Cost pressure often hits a few key inputs first (proteins, dairy, imported items)."
                        .to_string(),
                    effort: Effort::Low,
                    tradeoff: "Requires quick menu-cost check".to_string(),
                },
                SuggestedAction {
                    action: "Avoid locking large forward orders without price confirmation".to_string(),
                    when: "If score ≥ 50 (Elevated/Critical)".to_string(),
                    why: "Higher volatility can shorten supplier quote windows.".to_string(),
                    effort: Effort::Low,
                    tradeoff: "More frequent ordering/check-ins".to_string(),
                },
                SuggestedAction {
                    action: "Delay promotions that rely on imported inputs".to_string(),
                    when: "If FX volatility driver is present".to_string(),
                    why: "FX-driven repricing can compress margins unexpectedly.".to_string(),
                    effort: Effort::Low,
                    tradeoff: "Fewer near-term promo options".to_string(),
                },
            ],
            outlook: None,
            trust_note:
                "This card uses country-wide macro indicators as upstream proxies; it does not use purchase invoices."
                    .to_string(),
        },
        internal: Some(internal),
    }
}

pub async fn gather_pressures(
    pool: &SqlitePool,
    cfg: &SiteConfig,
) -> anyhow::Result<MacroPressures> {
    let mut pressures = MacroPressures::default();

    match store::latest_macro_point(pool, &cfg.macro_series.food_inflation).await? {
        Some((_, yoy)) => {
            pressures.food = Some(food_pressure(yoy));
            pressures
                .confidence_reasons
                .push("Food inflation series available.".to_string());
        }
        None => pressures
            .confidence_reasons
            .push("Food inflation series missing; pressure estimate is partial.".to_string()),
    }

    match store::latest_macro_point(pool, &cfg.macro_series.transport_inflation).await? {
        Some((_, var)) => {
            pressures.transport = Some(transport_pressure(var));
            pressures
                .confidence_reasons
                .push("Transport cost proxy series available.".to_string());
        }
        None => pressures
            .confidence_reasons
            .push("Transport cost proxy missing; transport pressure estimate is partial.".to_string()),
    }

    match store::fx_volatility(pool, &cfg.macro_series.fx_rate, FX_WINDOW_DAYS, FX_BASELINE_DAYS)
        .await?
    {
        Some((vol_window, vol_baseline)) => {
            pressures.fx = Some(fx_pressure(vol_window, vol_baseline));
            pressures.confidence_reasons.push(
                "FX series available; volatility computed from recent daily data.".to_string(),
            );
        }
        None => pressures
            .confidence_reasons
            .push("FX series missing or too short; volatility estimate is partial.".to_string()),
    }

    Ok(pressures)
}

pub async fn run(
    pool: &SqlitePool,
    cfg: &SiteConfig,
    thresholds: &Thresholds,
    out: &Path,
) -> anyhow::Result<()> {
    let pressures = gather_pressures(pool, cfg).await?;
    let now_local = Utc::now().with_timezone(&cfg.local_offset());

    let card = build_card(cfg, thresholds, &pressures, now_local);
    write_card(&card, out)?;
    println!("Logistics cost-pressure card written to {}.", out.display());
    Ok(())
}
