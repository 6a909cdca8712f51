use std::path::Path;

use anyhow::Context;

use crate::models::{Card, ImpactTier};

pub mod delivery;
pub mod late_arrival;
pub mod logistics;
pub mod reservation;

pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Shared raw-score scaling for the traffic-driven scorers. A raw weighted
/// sum around 2.5 saturates the 0–100 scale.
pub fn scale_raw_score(raw: f64) -> i64 {
    let scaled = (raw / 2.5) * 100.0;
    (scaled.round() as i64).clamp(0, 100)
}

/// Two-threshold bucketing used for driver impact tiers, so drivers stay
/// consistent with the sub-indicators the score was computed from.
pub fn impact_label(value: f64, low: f64, med: f64) -> ImpactTier {
    if value >= med {
        ImpactTier::High
    } else if value >= low {
        ImpactTier::Medium
    } else {
        ImpactTier::Low
    }
}

/// Same-day HH:MM window check, bounds inclusive.
pub fn in_hhmm_window(hhmm: &str, start: &str, end: &str) -> bool {
    start <= hhmm && hhmm <= end
}

pub fn write_card(card: &Card, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(card)?;
    std::fs::write(out, json)
        .with_context(|| format!("failed to write card {}", out.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_scores_scale_and_saturate() {
        assert_eq!(scale_raw_score(0.0), 0);
        assert_eq!(scale_raw_score(1.25), 50);
        assert_eq!(scale_raw_score(2.5), 100);
        assert_eq!(scale_raw_score(9.9), 100);
        assert_eq!(scale_raw_score(-1.0), 0);
    }

    #[test]
    fn impact_buckets_are_two_threshold() {
        assert_eq!(impact_label(0.05, 0.06, 0.12), ImpactTier::Low);
        assert_eq!(impact_label(0.06, 0.06, 0.12), ImpactTier::Medium);
        assert_eq!(impact_label(0.12, 0.06, 0.12), ImpactTier::High);
    }

    #[test]
    fn hhmm_window_is_inclusive() {
        assert!(in_hhmm_window("16:00", "16:00", "23:00"));
        assert!(in_hhmm_window("19:30", "16:00", "23:00"));
        assert!(in_hhmm_window("23:00", "16:00", "23:00"));
        assert!(!in_hhmm_window("15:59", "16:00", "23:00"));
        assert!(!in_hhmm_window("23:01", "16:00", "23:00"));
    }
}
