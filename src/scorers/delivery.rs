use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::json;
use sqlx::SqlitePool;

use crate::config::SiteConfig;
use crate::models::{
    Card, Confidence, ConfidenceLabel, Driver, Effort, ImpactTier, Insight, Status,
    SuggestedAction, CARD_SCHEMA_VERSION,
};
use crate::scorers::{in_hhmm_window, write_card};
use crate::severity::{clamp_score, classify, Thresholds};
use crate::signals::max_pop_next_3h;
use crate::store::{self, TrafficSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReasons {
    pub traffic: String,
    pub rain: String,
}

/// Delivery risk score: base uncertainty plus tiered traffic and rain
/// penalties. Both inputs are optional; missing data adds a small
/// uncertainty premium instead of failing.
pub fn score_delivery(traffic_ratio: Option<f64>, rain_pop_3h: Option<f64>) -> (i64, ScoreReasons) {
    let mut score: i64 = 10;

    let traffic = match traffic_ratio {
        None => {
            score += 10;
            "Traffic missing; adding uncertainty."
        }
        Some(ratio) if ratio >= 0.90 => {
            score += 5;
            "Traffic near freeflow."
        }
        Some(ratio) if ratio >= 0.75 => {
            score += 15;
            "Traffic moderately slower than freeflow."
        }
        Some(ratio) if ratio >= 0.60 => {
            score += 30;
            "Traffic significantly slower than freeflow."
        }
        Some(_) => {
            score += 45;
            "Traffic heavily congested."
        }
    };

    let rain = match rain_pop_3h {
        None => {
            score += 5;
            "Rain outlook missing; adding uncertainty."
        }
        Some(pop) if pop >= 0.60 => {
            score += 25;
            "High rain probability can slow last-mile delivery."
        }
        Some(pop) if pop >= 0.30 => {
            score += 15;
            "Moderate rain probability can increase delivery variability."
        }
        Some(pop) if pop >= 0.10 => {
            score += 5;
            "Low rain probability."
        }
        Some(_) => "Very low rain probability.",
    };

    (
        clamp_score(score),
        ScoreReasons {
            traffic: traffic.to_string(),
            rain: rain.to_string(),
        },
    )
}

pub fn build_card(
    cfg: &SiteConfig,
    thresholds: &Thresholds,
    traffic: Option<&TrafficSnapshot>,
    rain_pop_3h: Option<f64>,
    now_local: DateTime<FixedOffset>,
) -> Card {
    let traffic_ratio = traffic.and_then(TrafficSnapshot::ratio);
    let (score, reasons) = score_delivery(traffic_ratio, rain_pop_3h);
    let level = classify(score, thresholds);

    let window = cfg.service_window_local();
    let in_service = in_hhmm_window(&now_local.format("%H:%M").to_string(), &window.start, &window.end);

    let (confidence, confidence_reason) = match (traffic_ratio.is_some(), rain_pop_3h.is_some()) {
        (true, true) => (
            ConfidenceLabel::Medium,
            "Traffic and short-term rain outlook are available.",
        ),
        (true, false) | (false, true) => (
            ConfidenceLabel::Low,
            "One of traffic or weather context is missing; variability may be higher than shown.",
        ),
        (false, false) => (
            ConfidenceLabel::Low,
            "Traffic and weather context missing; this is mostly a placeholder.",
        ),
    };

    let subtitle = if in_service {
        "Delivery variability vs typical conditions".to_string()
    } else {
        format!(
            "Off-hours: informational snapshot (service window {}–{})",
            window.start, window.end
        )
    };

    let drivers = vec![
        Driver {
            label: "Traffic vs freeflow".to_string(),
            impact: if traffic_ratio.is_some_and(|r| r < 0.75) {
                ImpactTier::High
            } else {
                ImpactTier::Low
            },
        },
        Driver {
            label: "Rain probability next 3h".to_string(),
            impact: if rain_pop_3h.is_some_and(|p| p >= 0.30) {
                ImpactTier::High
            } else {
                ImpactTier::Low
            },
        },
        Driver {
            label: "Last-mile variability".to_string(),
            impact: ImpactTier::Medium,
        },
    ];

    let suggested_actions = vec![
        SuggestedAction {
            action: "Add a small buffer to quoted delivery ETA".to_string(),
            when: "If score ≥ 45 (Elevated/High)".to_string(),
            why: "Reduces late-delivery complaints when external variability is high.".to_string(),
            effort: Effort::Low,
            tradeoff: "Slightly longer ETA shown".to_string(),
        },
        SuggestedAction {
            action: "Prioritize nearby delivery zones first".to_string(),
            when: "If traffic ratio < 0.75 or rain pop ≥ 0.30".to_string(),
            why: "Shorter distances are less sensitive to external slowdowns.".to_string(),
            effort: Effort::Low,
            tradeoff: "May delay farther zones".to_string(),
        },
    ];

    let internal = json!({
        "traffic": traffic.map(|t| json!({
            "ts_utc": t.ts_utc,
            "current_speed_kmh": t.current_speed_kmh,
            "freeflow_speed_kmh": t.freeflow_speed_kmh,
            "ratio": t.ratio(),
        })),
        "weather": {"max_pop_next_3h": rain_pop_3h},
        "score_reasons": {"traffic": reasons.traffic, "rain": reasons.rain},
        "flags": {"is_in_service_window": in_service},
    });

    Card {
        schema_version: CARD_SCHEMA_VERSION.to_string(),
        site_id: cfg.site_id.clone(),
        site_name: cfg.site_name.clone(),
        generated_at_local: now_local.to_rfc3339(),
        service_window_local: window,
        insight: Insight {
            id: "delivery_risk".to_string(),
            title: "Delivery Risk".to_string(),
            category: "Delivery".to_string(),
            time_horizon: "0–3h".to_string(),
            status: Status {
                level,
                icon: level.icon().to_string(),
                score_0_100: score,
                subtitle,
                confidence: Confidence::Label(confidence),
                confidence_reason: confidence_reason.to_string(),
            },
            summary: "External conditions suggest delivery timing may vary with traffic and short-term rain risk."
                .to_string(),
            drivers,
            implications: vec![
                "Higher delivery ETA variability can increase customer frustration and remake risk."
                    .to_string(),
                "If conditions worsen, batching deliveries may trade speed for reliability."
                    .to_string(),
            ],
            supported_considerations: vec![
                "Consider slightly longer quoted ETAs when risk is Elevated/High.".to_string(),
                "Prioritize closer zones if conditions deteriorate.".to_string(),
                "If rain probability rises, expect slower rider availability and curbside delays."
                    .to_string(),
            ],
            suggested_actions,
            outlook: Some(
                "Outlook (0–3h): Conditions can shift quickly; re-run the pipeline closer to service."
                    .to_string(),
            ),
            trust_note:
                "This insight uses only external conditions (traffic/weather). No internal order data is used."
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
    let traffic = store::latest_traffic(pool).await?;
    let weather = store::latest_weather_payload(pool).await?;
    let pop_3h = max_pop_next_3h(weather.as_ref());
    let now_local = Utc::now().with_timezone(&cfg.local_offset());

    let card = build_card(cfg, thresholds, traffic.as_ref(), pop_3h, now_local);
    write_card(&card, out)?;
    println!("Delivery card written to {}.", out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Level;

    fn cfg() -> SiteConfig {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn congested_and_rainy_is_critical() {
        // 10 base + 45 heavy congestion + 25 high rain probability.
        let (score, reasons) = score_delivery(Some(0.55), Some(0.65));
        assert_eq!(score, 80);
        assert_eq!(classify(score, &Thresholds::default()), Level::Critical);
        assert_eq!(reasons.traffic, "Traffic heavily congested.");
    }

    #[test]
    fn traffic_tiers_match_contract() {
        assert_eq!(score_delivery(Some(0.95), Some(0.0)).0, 15);
        assert_eq!(score_delivery(Some(0.80), Some(0.0)).0, 25);
        assert_eq!(score_delivery(Some(0.65), Some(0.0)).0, 40);
        assert_eq!(score_delivery(Some(0.50), Some(0.0)).0, 55);
    }

    #[test]
    fn rain_tiers_match_contract() {
        assert_eq!(score_delivery(Some(0.95), Some(0.60)).0, 40);
        assert_eq!(score_delivery(Some(0.95), Some(0.30)).0, 30);
        assert_eq!(score_delivery(Some(0.95), Some(0.10)).0, 20);
        assert_eq!(score_delivery(Some(0.95), Some(0.05)).0, 15);
    }

    #[test]
    fn missing_signals_add_uncertainty_not_failure() {
        let (score, reasons) = score_delivery(None, None);
        assert_eq!(score, 25);
        assert_eq!(reasons.traffic, "Traffic missing; adding uncertainty.");
        assert_eq!(reasons.rain, "Rain outlook missing; adding uncertainty.");
    }

    #[test]
    fn card_level_matches_classified_score() {
        let now = crate::signals::parse_dt("2026-01-06T19:12:34-05:00").unwrap();
        let card = build_card(&cfg(), &Thresholds::default(), None, Some(0.65), now);
        let status = &card.insight.status;
        assert_eq!(status.score_0_100, 45);
        assert_eq!(status.level, classify(status.score_0_100, &Thresholds::default()));
        assert_eq!(status.confidence, Confidence::Label(ConfidenceLabel::Low));
        assert_eq!(card.insight.id, "delivery_risk");
    }

    #[test]
    fn off_hours_switches_the_subtitle() {
        let mid_afternoon = crate::signals::parse_dt("2026-01-06T14:00:00-05:00").unwrap();
        let card = build_card(&cfg(), &Thresholds::default(), None, None, mid_afternoon);
        assert!(card.insight.status.subtitle.starts_with("Off-hours"));

        let evening = crate::signals::parse_dt("2026-01-06T19:00:00-05:00").unwrap();
        let card = build_card(&cfg(), &Thresholds::default(), None, None, evening);
        assert_eq!(
            card.insight.status.subtitle,
            "Delivery variability vs typical conditions"
        );
    }
}
