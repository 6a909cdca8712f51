use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;

use crate::actions::{ranked_top_actions, MarkerClassifier};
use crate::config::SiteConfig;
use crate::models::{Feed, LevelCounts, RankedAction, Rollups, FEED_SCHEMA_VERSION};
use crate::severity::Level;
use crate::signals::parse_dt;

const TOP_ACTIONS: usize = 3;

/// Read every card artifact in the directory, in sorted filename order.
/// Files that are not valid JSON are skipped, not fatal.
pub fn load_cards_dir(cards_dir: &Path) -> anyhow::Result<Vec<Value>> {
    let mut paths: Vec<_> = std::fs::read_dir(cards_dir)
        .with_context(|| format!("cards dir not found: {}", cards_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut cards = Vec::new();
    for path in paths {
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(card) = serde_json::from_str::<Value>(&raw) {
            cards.push(card);
        }
    }
    Ok(cards)
}

fn card_insight_id(card: &Value) -> Option<&str> {
    let id = card.get("insight")?.get("id")?.as_str()?;
    if id.trim().is_empty() {
        None
    } else {
        Some(id)
    }
}

fn card_timestamp(card: &Value) -> Option<DateTime<FixedOffset>> {
    card.get("generated_at_local")
        .and_then(Value::as_str)
        .and_then(parse_dt)
}

pub fn card_level(card: &Value) -> Level {
    card.get("insight")
        .and_then(|i| i.get("status"))
        .and_then(|s| s.get("level"))
        .and_then(Value::as_str)
        .map_or(Level::Normal, Level::parse_lossy)
}

/// Dedup cards by `insight.id`, discovery order preserved. Within a group
/// the latest parsable timestamp wins; an unparsable timestamp loses to any
/// parsable one, and all-unparsable keeps the first encountered. Cards with
/// no well-formed insight id are dropped.
pub fn dedup_cards(cards: Vec<Value>) -> Vec<Value> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Value> = HashMap::new();

    for card in cards {
        let Some(id) = card_insight_id(&card).map(str::to_string) else {
            continue;
        };
        match by_id.get(&id) {
            None => {
                order.push(id.clone());
                by_id.insert(id, card);
            }
            Some(existing) => {
                let new_ts = card_timestamp(&card);
                let old_ts = card_timestamp(existing);
                let newer = match (new_ts, old_ts) {
                    (Some(n), Some(o)) => n > o,
                    (Some(_), None) => true,
                    _ => false,
                };
                if newer {
                    by_id.insert(id, card);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

/// Overall status is the worst level across surviving cards; unrecognized
/// levels rank as Normal so one odd card cannot inflate the rollup.
pub fn overall_status(cards: &[Value]) -> Level {
    cards
        .iter()
        .map(card_level)
        .max_by_key(|level| level.rank())
        .unwrap_or(Level::Normal)
}

pub fn counts_by_level(cards: &[Value]) -> LevelCounts {
    let mut counts = LevelCounts::default();
    for card in cards {
        match card_level(card) {
            Level::Normal => counts.normal += 1,
            Level::Watch => counts.watch += 1,
            Level::Elevated => counts.elevated += 1,
            Level::Critical => counts.critical += 1,
        }
    }
    counts
}

pub fn urgency_summary(top_actions: &[RankedAction]) -> String {
    let mut now = 0;
    let mut next_3h = 0;
    let mut monitor = 0;
    for action in top_actions {
        match action.urgency {
            crate::models::Urgency::Now => now += 1,
            crate::models::Urgency::Next3h => next_3h += 1,
            crate::models::Urgency::Monitor => monitor += 1,
        }
    }

    let mut parts = Vec::new();
    if now > 0 {
        parts.push(format!("{now} Now"));
    }
    if next_3h > 0 {
        parts.push(format!("{next_3h} Next 3h"));
    }
    if monitor > 0 {
        parts.push(format!("{monitor} Monitor"));
    }
    if parts.is_empty() {
        "No actions".to_string()
    } else {
        parts.join(" • ")
    }
}

/// The category appearing most often among the top actions; count dominates
/// and aggregate severity breaks ties. "Operations" when there are none.
pub fn top_category(top_actions: &[RankedAction]) -> String {
    if top_actions.is_empty() {
        return "Operations".to_string();
    }
    let mut tally: HashMap<&str, u32> = HashMap::new();
    let mut best_cat = "Operations";
    let mut best_score = -1i64;
    for action in top_actions {
        let cat = action.source.category.as_str();
        let count = tally.entry(cat).or_insert(0);
        *count += 1;
        let score = i64::from(*count) * 10 + i64::from(action.source.status_level.rank());
        if score > best_score {
            best_score = score;
            best_cat = cat;
        }
    }
    best_cat.to_string()
}

/// One human-readable sentence for the whole feed, templated by overall
/// status; Watch branches further on the dominant category.
pub fn build_summary(overall: Level, top_actions: &[RankedAction]) -> String {
    let cat = top_category(top_actions);
    let cat_lower = cat.to_lowercase();

    match overall {
        Level::Normal => {
            if top_actions.is_empty() {
                "Conditions look stable; keep normal ops and monitor for changes.".to_string()
            } else {
                format!("Conditions look stable; keep normal ops and monitor {cat_lower} for changes.")
            }
        }
        Level::Watch => match cat_lower.as_str() {
            "delivery" => "Watch conditions tonight: delivery reliability may vary; apply quick buffers and prioritize nearby zones.".to_string(),
            "reservations" => "Watch conditions tonight: arrival timing may vary; use proactive check-ins and small buffers to protect flow.".to_string(),
            _ => format!("Watch conditions tonight: increased variability likely; take quick steps to protect {cat_lower}."),
        },
        Level::Elevated => format!(
            "Elevated risk tonight: disruptions are likely; prioritize buffers and proactive messaging to protect {cat_lower}."
        ),
        Level::Critical => format!(
            "Critical conditions: significant disruption likely; enact contingency ops and communicate early to protect {cat_lower}."
        ),
    }
}

/// Rebuild the feed from scratch out of the current card artifacts.
pub fn build_feed(cfg: &SiteConfig, cards: Vec<Value>) -> Feed {
    let deduped = dedup_cards(cards);

    let newest = deduped.iter().filter_map(card_timestamp).max();
    let generated_at_local = newest
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    let top_actions = ranked_top_actions(&deduped, TOP_ACTIONS, &MarkerClassifier);
    let overall = overall_status(&deduped);

    let rollups = Rollups {
        overall_status: overall,
        counts_by_level: counts_by_level(&deduped),
        urgency_summary: urgency_summary(&top_actions),
        summary: build_summary(overall, &top_actions),
        top_actions,
    };

    Feed {
        schema_version: FEED_SCHEMA_VERSION.to_string(),
        site_id: cfg.site_id.clone(),
        site_name: cfg.site_name.clone(),
        generated_at_local,
        cards: deduped,
        rollups,
    }
}

pub fn write_feed(feed: &Feed, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(feed)?;
    std::fs::write(out, json)
        .with_context(|| format!("failed to write feed {}", out.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Urgency;
    use serde_json::json;

    fn card(id: &str, level: &str, ts: &str) -> Value {
        json!({
            "generated_at_local": ts,
            "insight": {
                "id": id,
                "title": "Card",
                "category": "Delivery",
                "time_horizon": "0–3h",
                "status": {"level": level, "score_0_100": 40},
                "suggested_actions": [],
            }
        })
    }

    #[test]
    fn dedup_keeps_the_latest_card_per_id() {
        let older = card("delivery_risk", "Watch", "2026-01-06T18:00:00-05:00");
        let newer = card("delivery_risk", "Elevated", "2026-01-06T19:30:00-05:00");
        let other = card("late_arrival_risk", "Normal", "2026-01-06T18:30:00-05:00");

        let deduped = dedup_cards(vec![older, newer.clone(), other]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0], newer);
        // First-seen order is preserved.
        assert_eq!(card_insight_id(&deduped[1]), Some("late_arrival_risk"));
    }

    #[test]
    fn unparsable_timestamps_lose_to_parsable_ones() {
        let bad_ts = card("x", "Critical", "not a timestamp");
        let good_ts = card("x", "Watch", "2026-01-06T18:00:00-05:00");
        let deduped = dedup_cards(vec![bad_ts.clone(), good_ts.clone()]);
        assert_eq!(deduped, vec![good_ts]);

        // All-unparsable keeps the first encountered.
        let other_bad = card("x", "Watch", "also bad");
        let deduped = dedup_cards(vec![bad_ts.clone(), other_bad]);
        assert_eq!(deduped, vec![bad_ts]);
    }

    #[test]
    fn cards_without_a_usable_id_are_dropped() {
        let no_insight = json!({"generated_at_local": "2026-01-06T18:00:00-05:00"});
        let blank_id = card("   ", "Watch", "2026-01-06T18:00:00-05:00");
        let ok = card("delivery_risk", "Watch", "2026-01-06T18:00:00-05:00");
        let deduped = dedup_cards(vec![no_insight, blank_id, ok]);
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn overall_status_is_the_worst_level() {
        let cards = vec![
            card("a", "Normal", "2026-01-06T18:00:00-05:00"),
            card("b", "Elevated", "2026-01-06T18:00:00-05:00"),
            card("c", "Watch", "2026-01-06T18:00:00-05:00"),
        ];
        assert_eq!(overall_status(&cards), Level::Elevated);
        assert_eq!(overall_status(&[]), Level::Normal);
    }

    #[test]
    fn unrecognized_levels_count_as_normal() {
        let cards = vec![
            card("a", "Sideways", "2026-01-06T18:00:00-05:00"),
            card("b", "Critical", "2026-01-06T18:00:00-05:00"),
        ];
        let counts = counts_by_level(&cards);
        assert_eq!(counts.normal, 1);
        assert_eq!(counts.critical, 1);
        assert_eq!(overall_status(&cards), Level::Critical);
    }

    fn action(category: &str, level: Level, urgency: Urgency) -> RankedAction {
        RankedAction {
            action: "Do something".to_string(),
            when: None,
            why: None,
            urgency,
            effort: crate::models::Effort::Low,
            tradeoff: None,
            source: crate::models::ActionSource {
                insight_id: "id".to_string(),
                insight_title: "Title".to_string(),
                category: category.to_string(),
                status_level: level,
                score_0_100: Some(40),
                generated_at_local: None,
            },
        }
    }

    #[test]
    fn urgency_summary_omits_zero_buckets() {
        let actions = vec![
            action("Delivery", Level::Watch, Urgency::Now),
            action("Delivery", Level::Watch, Urgency::Now),
            action("Delivery", Level::Watch, Urgency::Monitor),
        ];
        assert_eq!(urgency_summary(&actions), "2 Now • 1 Monitor");
        assert_eq!(urgency_summary(&[]), "No actions");
    }

    #[test]
    fn top_category_counts_dominate_severity_ties() {
        let actions = vec![
            action("Delivery", Level::Critical, Urgency::Now),
            action("Reservations", Level::Watch, Urgency::Now),
            action("Reservations", Level::Watch, Urgency::Now),
        ];
        assert_eq!(top_category(&actions), "Reservations");
        assert_eq!(top_category(&[]), "Operations");
    }

    #[test]
    fn summary_templates_follow_overall_status() {
        let delivery = vec![action("Delivery", Level::Watch, Urgency::Now)];
        assert!(build_summary(Level::Watch, &delivery).contains("delivery reliability may vary"));

        let reservations = vec![action("Reservations", Level::Watch, Urgency::Now)];
        assert!(build_summary(Level::Watch, &reservations).contains("arrival timing may vary"));

        let logistics = vec![action("Logistics", Level::Watch, Urgency::Now)];
        assert!(build_summary(Level::Watch, &logistics).contains("protect logistics."));

        assert!(build_summary(Level::Critical, &delivery).starts_with("Critical conditions"));
        assert!(build_summary(Level::Elevated, &delivery).starts_with("Elevated risk tonight"));
        assert_eq!(
            build_summary(Level::Normal, &[]),
            "Conditions look stable; keep normal ops and monitor for changes."
        );
        assert!(build_summary(Level::Normal, &delivery).contains("monitor delivery for changes."));
    }

    #[test]
    fn feed_timestamp_is_the_newest_card_timestamp() {
        let cfg: SiteConfig = serde_json::from_str("{}").unwrap();
        let cards = vec![
            card("a", "Watch", "2026-01-06T18:00:00-05:00"),
            card("b", "Normal", "2026-01-06T19:45:00-05:00"),
        ];
        let feed = build_feed(&cfg, cards);
        assert_eq!(feed.generated_at_local, "2026-01-06T19:45:00-05:00");
        assert_eq!(feed.cards.len(), 2);
        assert_eq!(feed.rollups.overall_status, Level::Watch);
        assert_eq!(feed.schema_version, FEED_SCHEMA_VERSION);
    }

    #[test]
    fn feed_with_no_parsable_timestamps_falls_back_to_now() {
        let cfg: SiteConfig = serde_json::from_str("{}").unwrap();
        let feed = build_feed(&cfg, vec![card("a", "Watch", "garbage")]);
        // Still a valid RFC-3339 stamp even though no card supplied one.
        assert!(crate::signals::parse_dt(&feed.generated_at_local).is_some());
    }
}
