use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::severity::ALLOWED_LEVELS;
use crate::signals::parse_dt;

const CLOCK_DRIFT_MINUTES: i64 = 5;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

fn field_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

fn drift_warning(ts: DateTime<chrono::FixedOffset>, now: DateTime<Utc>) -> bool {
    ts.with_timezone(&Utc) > now + Duration::minutes(CLOCK_DRIFT_MINUTES)
}

/// Last line of defense before the feed reaches consumers: field-path errors
/// for contract violations, warnings only for clock drift and odd timestamps.
pub fn validate_feed(feed: &Value, now: DateTime<Utc>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for key in [
        "schema_version",
        "site_id",
        "site_name",
        "generated_at_local",
        "cards",
    ] {
        if field_at(feed, &[key]).is_none() {
            report.errors.push(format!("Missing top-level field: '{key}'"));
        }
    }
    if !report.errors.is_empty() {
        return report;
    }

    let Some(cards) = feed["cards"].as_array() else {
        report.errors.push("Top-level 'cards' must be a list.".to_string());
        return report;
    };

    match feed["generated_at_local"].as_str().and_then(parse_dt) {
        None => report.warnings.push(
            "Top-level 'generated_at_local' is missing or not a valid ISO datetime.".to_string(),
        ),
        Some(ts) if drift_warning(ts, now) => report.warnings.push(
            "Top-level 'generated_at_local' appears to be >5 minutes in the future (clock drift?)."
                .to_string(),
        ),
        Some(_) => {}
    }

    let required_card_fields: [&[&str]; 7] = [
        &["generated_at_local"],
        &["insight"],
        &["insight", "id"],
        &["insight", "title"],
        &["insight", "category"],
        &["insight", "status"],
        &["insight", "status", "level"],
    ];

    let mut seen_ids: HashSet<String> = HashSet::new();

    for (i, card) in cards.iter().enumerate() {
        if !card.is_object() {
            report.errors.push(format!("Card[{i}] is not an object."));
            continue;
        }

        for path in required_card_fields {
            if field_at(card, path).is_none() {
                report
                    .errors
                    .push(format!("Card[{i}] missing field: {}", path.join(".")));
            }
        }

        let Some(insight) = card.get("insight").filter(|v| v.is_object()) else {
            continue;
        };

        match insight.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => {
                if !seen_ids.insert(id.to_string()) {
                    report
                        .errors
                        .push(format!("Duplicate insight.id in feed: '{id}'"));
                }
            }
            _ => report
                .errors
                .push(format!("Card[{i}] insight.id must be a non-empty string.")),
        }

        if let Some(status) = insight.get("status").filter(|v| v.is_object()) {
            match status.get("level") {
                Some(Value::String(level)) => {
                    if !ALLOWED_LEVELS.contains(&level.as_str()) {
                        report.errors.push(format!(
                            "Card[{i}] insight.status.level '{level}' is not allowed. Allowed: {ALLOWED_LEVELS:?}"
                        ));
                    }
                }
                Some(_) => report
                    .errors
                    .push(format!("Card[{i}] insight.status.level must be a string.")),
                None => {}
            }

            if let Some(score) = status.get("score_0_100") {
                match score.as_i64() {
                    None => report.errors.push(format!(
                        "Card[{i}] insight.status.score_0_100 must be an integer (0–100)."
                    )),
                    Some(s) if !(0..=100).contains(&s) => report.errors.push(format!(
                        "Card[{i}] insight.status.score_0_100 out of range (0–100): {s}"
                    )),
                    Some(_) => {}
                }
            }
        }

        match card
            .get("generated_at_local")
            .and_then(Value::as_str)
            .and_then(parse_dt)
        {
            None => report.warnings.push(format!(
                "Card[{i}] generated_at_local missing or invalid ISO datetime."
            )),
            Some(ts) if drift_warning(ts, now) => report.warnings.push(format!(
                "Card[{i}] generated_at_local appears >5 minutes in the future (clock drift?)."
            )),
            Some(_) => {}
        }
    }

    if cards.is_empty() {
        report.errors.push("Feed contains 0 cards.".to_string());
    }

    report
}

pub fn validate_feed_file(feed_path: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();
    if !feed_path.exists() {
        report
            .errors
            .push(format!("Feed file not found: {}", feed_path.display()));
        return report;
    }
    let raw = match std::fs::read_to_string(feed_path) {
        Ok(raw) => raw,
        Err(err) => {
            report
                .errors
                .push(format!("Feed file not readable: {err}"));
            return report;
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(feed) => validate_feed(&feed, Utc::now()),
        Err(err) => {
            report.errors.push(format!("Feed is not valid JSON: {err}"));
            report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        parse_dt("2026-01-06T20:00:00-05:00").unwrap().with_timezone(&Utc)
    }

    fn valid_card(id: &str) -> Value {
        json!({
            "generated_at_local": "2026-01-06T19:00:00-05:00",
            "insight": {
                "id": id,
                "title": "Card",
                "category": "Delivery",
                "status": {"level": "Watch", "score_0_100": 40},
            }
        })
    }

    fn valid_feed(cards: Vec<Value>) -> Value {
        json!({
            "schema_version": "ui-ready-feed-v1",
            "site_id": "site",
            "site_name": "Site",
            "generated_at_local": "2026-01-06T19:30:00-05:00",
            "cards": cards,
        })
    }

    #[test]
    fn a_well_formed_feed_passes() {
        let feed = valid_feed(vec![valid_card("a"), valid_card("b")]);
        let report = validate_feed(&feed, now());
        assert!(report.passed(), "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_top_level_fields_stop_early() {
        let report = validate_feed(&json!({"cards": []}), now());
        assert!(report.errors.iter().any(|e| e == "Missing top-level field: 'site_id'"));
        assert!(report
            .errors
            .iter()
            .all(|e| e.starts_with("Missing top-level field")));
    }

    #[test]
    fn zero_cards_is_an_error() {
        let report = validate_feed(&valid_feed(vec![]), now());
        assert!(report.errors.iter().any(|e| e == "Feed contains 0 cards."));
    }

    #[test]
    fn duplicate_insight_ids_are_rejected() {
        let feed = valid_feed(vec![valid_card("a"), valid_card("a")]);
        let report = validate_feed(&feed, now());
        assert!(report
            .errors
            .iter()
            .any(|e| e == "Duplicate insight.id in feed: 'a'"));
    }

    #[test]
    fn disallowed_levels_and_bad_scores_are_errors() {
        let mut card = valid_card("a");
        card["insight"]["status"]["level"] = json!("Sideways");
        card["insight"]["status"]["score_0_100"] = json!(140);
        let report = validate_feed(&valid_feed(vec![card]), now());
        assert!(report.errors.iter().any(|e| e.contains("'Sideways' is not allowed")));
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("out of range (0–100): 140")));

        let mut card = valid_card("b");
        card["insight"]["status"]["score_0_100"] = json!(12.5);
        let report = validate_feed(&valid_feed(vec![card]), now());
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("must be an integer (0–100).")));
    }

    #[test]
    fn missing_card_fields_report_their_paths() {
        let card = json!({"insight": {"id": "a", "status": {"level": "Normal"}}});
        let report = validate_feed(&valid_feed(vec![card]), now());
        assert!(report
            .errors
            .iter()
            .any(|e| e == "Card[0] missing field: generated_at_local"));
        assert!(report
            .errors
            .iter()
            .any(|e| e == "Card[0] missing field: insight.title"));
        assert!(report
            .errors
            .iter()
            .any(|e| e == "Card[0] missing field: insight.category"));
    }

    #[test]
    fn future_timestamps_warn_but_do_not_fail() {
        let mut feed = valid_feed(vec![valid_card("a")]);
        feed["generated_at_local"] = json!("2026-01-06T21:00:00-05:00");
        feed["cards"][0]["generated_at_local"] = json!("2026-01-06T21:00:00-05:00");
        let report = validate_feed(&feed, now());
        assert!(report.passed());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("clock drift"));
    }

    #[test]
    fn non_object_card_is_an_error() {
        let report = validate_feed(&valid_feed(vec![json!("nope")]), now());
        assert!(report.errors.iter().any(|e| e == "Card[0] is not an object."));
    }
}
