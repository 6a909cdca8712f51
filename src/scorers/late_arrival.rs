use std::path::Path;

use anyhow::bail;
use chrono::{DateTime, FixedOffset, Timelike};
use serde_json::json;
use sqlx::SqlitePool;

use crate::config::SiteConfig;
use crate::models::{
    Card, Confidence, ConfidenceLabel, Driver, Effort, ImpactTier, Insight, Status,
    SuggestedAction, CARD_SCHEMA_VERSION,
};
use crate::scorers::{impact_label, scale_raw_score, write_card};
use crate::severity::{classify, Level, Thresholds};
use crate::signals::{outlook_next_3h, parse_dt, ratio_volatility, Outlook};
use crate::store;

/// Sub-indicators feeding the late-arrival heuristic.
#[derive(Debug, Clone, Copy)]
pub struct LateArrivalParts {
    pub congestion: f64,
    pub volatility: f64,
    pub rain_likely: bool,
    pub is_peak: bool,
}

/// Late arrival risk emphasizes volatility and rain over steady congestion,
/// plus peak-hour sensitivity.
pub fn score_late_arrival(parts: &LateArrivalParts) -> i64 {
    let mut raw = 0.0;
    raw += parts.congestion * 1.8;
    raw += parts.volatility * 2.4;
    if parts.rain_likely {
        raw += 0.7;
    }
    if parts.is_peak {
        raw += 0.6;
    }
    scale_raw_score(raw)
}

#[allow(clippy::too_many_arguments)]
pub fn build_card(
    cfg: &SiteConfig,
    thresholds: &Thresholds,
    ratio: Option<f64>,
    parts: &LateArrivalParts,
    outlook: Option<Outlook>,
    have_weather: bool,
    dt_local: DateTime<FixedOffset>,
) -> Card {
    let score = score_late_arrival(parts);
    let level = classify(score, thresholds);

    let in_service = cfg.service_window.contains_hour(dt_local.hour());

    let (confidence, confidence_reason) = if !have_weather {
        (
            ConfidenceLabel::Medium,
            "Traffic data is available; weather context is missing, so late-arrival amplification is uncertain.",
        )
    } else if parts.volatility < 0.10 {
        (
            ConfidenceLabel::High,
            "Traffic and weather outlook are available; confidence depends on short-term traffic volatility.",
        )
    } else {
        (
            ConfidenceLabel::Medium,
            "Traffic and weather outlook are available; confidence depends on short-term traffic volatility.",
        )
    };

    let subtitle = if in_service {
        "Arrival punctuality risk for the next 0–3 hours".to_string()
    } else {
        let window = cfg.service_window_local();
        format!(
            "Off-hours: informational snapshot (service window {}–{})",
            window.start, window.end
        )
    };

    let drivers = vec![
        Driver {
            label: "Short-term traffic volatility (60m)".to_string(),
            impact: impact_label(parts.volatility, 0.06, 0.12),
        },
        Driver {
            label: "Traffic congestion proxy".to_string(),
            impact: impact_label(parts.congestion, 0.10, 0.25),
        },
        Driver {
            label: "Rain / precipitation outlook".to_string(),
            impact: if parts.rain_likely {
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
    ];

    let summary = if level == Level::Normal {
        "Arrival punctuality risk appears stable under current external conditions."
    } else {
        "Late arrivals may become more frequent due to volatile traffic and/or weather amplification."
    };

    let mut suggested_actions = vec![
        SuggestedAction {
            action: "Send a soft check-in message shortly before reservation time".to_string(),
            when: "10–15 minutes before reservation time".to_string(),
            why: "Reduces uncertainty and allows re-sequencing if guests report delays.".to_string(),
            effort: Effort::Low,
            tradeoff: "Adds messaging workload".to_string(),
        },
        SuggestedAction {
            action: "Use slightly wider buffers for groups of 5+ when volatility is high".to_string(),
            when: "When traffic volatility is Medium/High".to_string(),
            why: "Large groups amplify the operational cost of late arrivals.".to_string(),
            effort: Effort::Low,
            tradeoff: "Fewer tightly-packed slots".to_string(),
        },
    ];

    if level != Level::Normal || (parts.is_peak && parts.volatility >= 0.08) {
        suggested_actions.push(SuggestedAction {
            action: "Avoid scheduling back-to-back reservation start times during peak".to_string(),
            when: format!("During peak window ({})", cfg.peak_window.label()),
            why: "Reduces cascading delays when arrivals cluster or slip.".to_string(),
            effort: Effort::Medium,
            tradeoff: "May reduce peak throughput, improves experience".to_string(),
        });
    }

    let outlook_text = match &outlook {
        None => "Outlook (0–3h): Limited weather outlook available.",
        Some(o) if o.rain_likely => {
            "Outlook (0–3h): Rain risk could increase late-arrival likelihood."
        }
        Some(_) => "Outlook (0–3h): Conditions are likely to remain similar in the near term.",
    };

    let internal = json!({
        "traffic": {
            "ratio": ratio,
            "congestion": parts.congestion,
            "volatility_60m": parts.volatility,
        },
        "weather": {
            "rain_likely_next_3h": parts.rain_likely,
            "max_pop_next_3h": outlook.map(|o| o.max_pop),
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
        service_window_local: cfg.service_window_local(),
        insight: Insight {
            id: "late_arrival_risk".to_string(),
            title: "Late Arrival Risk".to_string(),
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
                "Higher probability of customers arriving late, causing table-sequencing friction."
                    .to_string(),
                "Increased variance in seating times can cause knock-on delays during busy periods."
                    .to_string(),
            ],
            supported_considerations: vec![
                "Traffic volatility affects punctuality more than steady congestion.".to_string(),
                "Rain risk can increase both travel friction and unpredictability.".to_string(),
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
        bail!("no traffic snapshots in the signal store; cannot score late-arrival risk");
    };

    let Some(dt_utc) = parse_dt(&traffic.ts_utc) else {
        bail!("latest traffic snapshot has an unparsable timestamp: {}", traffic.ts_utc);
    };
    let dt_local = dt_utc.with_timezone(&cfg.local_offset());

    let ratios = store::recent_traffic_ratios(pool, 60).await?;
    let volatility = ratio_volatility(&ratios);

    let weather = store::latest_weather_payload(pool).await?;
    let outlook = outlook_next_3h(weather.as_ref());

    let ratio = traffic.ratio();
    let parts = LateArrivalParts {
        congestion: ratio.map_or(0.0, |r| (1.0 - r).max(0.0)),
        volatility,
        rain_likely: outlook.is_some_and(|o| o.rain_likely),
        is_peak: cfg.peak_window.contains_hour(dt_local.hour()),
    };

    let card = build_card(
        cfg,
        thresholds,
        ratio,
        &parts,
        outlook,
        weather.is_some(),
        dt_local,
    );
    write_card(&card, out)?;
    println!("Late-arrival card written to {}.", out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SiteConfig {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn calm_conditions_score_low() {
        let parts = LateArrivalParts {
            congestion: 0.0,
            volatility: 0.0,
            rain_likely: false,
            is_peak: false,
        };
        assert_eq!(score_late_arrival(&parts), 0);
    }

    #[test]
    fn weights_follow_the_contract() {
        // 0.3*1.8 + 0.15*2.4 + 0.7 + 0.6 = 2.2 -> 88
        let parts = LateArrivalParts {
            congestion: 0.3,
            volatility: 0.15,
            rain_likely: true,
            is_peak: true,
        };
        assert_eq!(score_late_arrival(&parts), 88);
    }

    #[test]
    fn rain_and_peak_alone_reach_elevated() {
        // 0.7 + 0.6 = 1.3 -> 52
        let parts = LateArrivalParts {
            congestion: 0.0,
            volatility: 0.0,
            rain_likely: true,
            is_peak: true,
        };
        let score = score_late_arrival(&parts);
        assert_eq!(score, 52);
        assert_eq!(classify(score, &Thresholds::default()), Level::Elevated);
    }

    #[test]
    fn missing_weather_caps_confidence_at_medium() {
        let dt = parse_dt("2026-01-06T20:00:00-05:00").unwrap();
        let parts = LateArrivalParts {
            congestion: 0.05,
            volatility: 0.02,
            rain_likely: false,
            is_peak: true,
        };
        let card = build_card(&cfg(), &Thresholds::default(), Some(0.95), &parts, None, false, dt);
        assert_eq!(
            card.insight.status.confidence,
            Confidence::Label(ConfidenceLabel::Medium)
        );
        assert_eq!(
            card.insight.outlook.as_deref(),
            Some("Outlook (0–3h): Limited weather outlook available.")
        );
    }

    #[test]
    fn peak_volatility_appends_the_sequencing_action() {
        let dt = parse_dt("2026-01-06T20:00:00-05:00").unwrap();
        let calm = LateArrivalParts {
            congestion: 0.0,
            volatility: 0.02,
            rain_likely: false,
            is_peak: true,
        };
        let card = build_card(
            &cfg(),
            &Thresholds::default(),
            Some(1.0),
            &calm,
            Some(Outlook { rain_likely: false, max_pop: 0.0 }),
            true,
            dt,
        );
        assert_eq!(card.insight.suggested_actions.len(), 2);

        let jittery = LateArrivalParts { volatility: 0.09, ..calm };
        let card = build_card(
            &cfg(),
            &Thresholds::default(),
            Some(1.0),
            &jittery,
            Some(Outlook { rain_likely: false, max_pop: 0.0 }),
            true,
            dt,
        );
        assert_eq!(card.insight.suggested_actions.len(), 3);
        assert!(card.insight.suggested_actions[2]
            .when
            .contains("19:00–22:00"));
    }

    #[test]
    fn level_always_matches_classified_score() {
        let dt = parse_dt("2026-01-06T20:00:00-05:00").unwrap();
        let parts = LateArrivalParts {
            congestion: 0.45,
            volatility: 0.2,
            rain_likely: true,
            is_peak: true,
        };
        let card = build_card(&cfg(), &Thresholds::default(), Some(0.55), &parts, None, false, dt);
        let status = &card.insight.status;
        assert!((0..=100).contains(&status.score_0_100));
        assert_eq!(status.level, classify(status.score_0_100, &Thresholds::default()));
    }
}
