use std::cmp::Reverse;
use std::collections::HashMap;

use serde_json::Value;

use crate::models::{ActionSource, Effort, RankedAction, Urgency};
use crate::severity::Level;

/// Lowercased text fields an urgency classifier may look at.
#[derive(Debug, Clone, Default)]
pub struct ActionText {
    pub action: String,
    pub when: String,
    pub why: String,
    pub time_horizon: String,
}

impl ActionText {
    pub fn new(action: &str, when: &str, why: &str, time_horizon: &str) -> ActionText {
        ActionText {
            action: action.to_lowercase(),
            when: when.to_lowercase(),
            why: why.to_lowercase(),
            time_horizon: time_horizon.to_lowercase(),
        }
    }
}

/// Urgency inference is heuristic and locale-bound; keeping it behind a
/// narrow trait lets a better classifier replace the marker matching without
/// touching extraction or ranking.
pub trait UrgencyClassifier {
    fn infer(&self, text: &ActionText) -> Urgency;
}

/// Rule-based classifier over a fixed English marker vocabulary.
/// Case-insensitive substring matching; the first matching rule wins, and
/// false positives are tolerated by design.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerClassifier;

const NOW_MARKERS: &[&str] = &[
    "now",
    "immediately",
    "right away",
    "10",
    "15",
    "minutes",
    "minute",
    "shortly before",
    "before reservation",
    "check-in",
    "call",
    "confirm",
];

const NEXT_3H_MARKERS: &[&str] = &[
    "next 3 hours",
    "next 3h",
    "next 2 hours",
    "next 2h",
    "during peak",
    "peak window",
    "tonight",
];

const MONITOR_MARKERS: &[&str] = &[
    "monitor",
    "keep an eye",
    "if conditions",
    "may",
    "could",
    "watch",
];

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack.contains(m))
}

impl UrgencyClassifier for MarkerClassifier {
    fn infer(&self, text: &ActionText) -> Urgency {
        if contains_any(&text.when, NOW_MARKERS) || text.action.contains("shortly before") {
            return Urgency::Now;
        }
        if contains_any(&text.when, NEXT_3H_MARKERS) {
            return Urgency::Next3h;
        }
        // The owning card's horizon is the fallback window signal.
        if text.time_horizon.contains("0–3") || text.time_horizon.contains("0-3") {
            return Urgency::Next3h;
        }
        if contains_any(&text.why, MONITOR_MARKERS) || contains_any(&text.action, MONITOR_MARKERS) {
            return Urgency::Monitor;
        }
        Urgency::Next3h
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Pull every well-formed suggested action out of every card, attaching the
/// inferred urgency and a source back-reference to the owning card.
pub fn extract_actions(cards: &[Value], classifier: &impl UrgencyClassifier) -> Vec<RankedAction> {
    let mut actions = Vec::new();
    for card in cards {
        let Some(insight) = card.get("insight").filter(|i| i.is_object()) else {
            continue;
        };
        let insight_id = str_field(insight, "id").unwrap_or("unknown");
        let insight_title = str_field(insight, "title").unwrap_or("Untitled");
        let category = str_field(insight, "category").unwrap_or("General");
        let time_horizon = str_field(insight, "time_horizon").unwrap_or("");

        let status = insight.get("status").cloned().unwrap_or(Value::Null);
        let level = str_field(&status, "level").map_or(Level::Normal, Level::parse_lossy);
        let score = status.get("score_0_100").and_then(Value::as_i64);
        let generated_at = str_field(card, "generated_at_local").map(str::to_string);

        let Some(suggested) = insight.get("suggested_actions").and_then(Value::as_array) else {
            continue;
        };

        for entry in suggested {
            let Some(action_text) = str_field(entry, "action") else {
                continue;
            };
            if action_text.trim().is_empty() {
                continue;
            }
            let when = str_field(entry, "when");
            let why = str_field(entry, "why");
            let effort = str_field(entry, "effort").map_or(Effort::Medium, Effort::parse_lossy);
            let text = ActionText::new(
                action_text,
                when.unwrap_or(""),
                why.unwrap_or(""),
                time_horizon,
            );

            actions.push(RankedAction {
                action: action_text.trim().to_string(),
                when: when.map(str::to_string),
                why: why.map(str::to_string),
                urgency: classifier.infer(&text),
                effort,
                tradeoff: str_field(entry, "tradeoff").map(str::to_string),
                source: ActionSource {
                    insight_id: insight_id.to_string(),
                    insight_title: insight_title.to_string(),
                    category: category.to_string(),
                    status_level: level,
                    score_0_100: score,
                    generated_at_local: generated_at.clone(),
                },
            });
        }
    }
    actions
}

/// Tie-break key for dedup: higher severity wins, then lower effort, then
/// higher score (missing score ranks below all real scores).
fn dedup_key(action: &RankedAction) -> (u8, Reverse<u8>, i64) {
    (
        action.source.status_level.rank(),
        Reverse(action.effort.rank()),
        action.source.score_0_100.unwrap_or(-1),
    )
}

/// Collapse actions with identical normalized text down to one
/// representative each.
pub fn dedup_actions(actions: Vec<RankedAction>) -> Vec<RankedAction> {
    let mut by_text: HashMap<String, RankedAction> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for action in actions {
        let key = action.action.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        match by_text.get(&key) {
            None => {
                order.push(key.clone());
                by_text.insert(key, action);
            }
            Some(existing) => {
                if dedup_key(&action) > dedup_key(existing) {
                    by_text.insert(key, action);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_text.remove(&key))
        .collect()
}

/// Deduplicated actions ranked most-urgent first, with severity, effort,
/// score, and finally action text as tie-breaks for full determinism.
pub fn ranked_top_actions(
    cards: &[Value],
    top_n: usize,
    classifier: &impl UrgencyClassifier,
) -> Vec<RankedAction> {
    let mut deduped = dedup_actions(extract_actions(cards, classifier));
    deduped.sort_by_key(|a| {
        (
            a.urgency.rank(),
            Reverse(a.source.status_level.rank()),
            a.effort.rank(),
            Reverse(a.source.score_0_100.unwrap_or(-1)),
            a.action.clone(),
        )
    });
    deduped.truncate(top_n);
    deduped
}
