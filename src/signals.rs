use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, TimeZone, Timelike, Utc, Weekday};
use serde_json::Value;

/// Lenient ISO-8601 parse for timestamps found in the store and in card
/// artifacts. Accepts a trailing `Z`, an explicit offset, or a naive
/// datetime (assumed UTC). Anything else is "no timestamp", never an error.
pub fn parse_dt(value: &str) -> Option<DateTime<FixedOffset>> {
    let s = value.trim();
    if s.is_empty() {
        return None;
    }
    let normalized = if let Some(stripped) = s.strip_suffix('Z') {
        format!("{stripped}+00:00")
    } else {
        s.to_string()
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(Utc.from_utc_datetime(&naive).fixed_offset())
}

/// Current/free-flow speed ratio. Undefined when either speed is missing or
/// the free-flow reference is non-positive; lower means worse traffic.
pub fn speed_ratio(current: Option<f64>, freeflow: Option<f64>) -> Option<f64> {
    match (current, freeflow) {
        (Some(cur), Some(ff)) if ff > 0.0 => Some(cur / ff),
        _ => None,
    }
}

/// Short-term volatility: max minus min over the window, but only once at
/// least 4 samples exist. Fewer samples read as calm, not as unknown.
pub fn ratio_volatility(ratios: &[f64]) -> f64 {
    if ratios.len() < 4 {
        return 0.0;
    }
    let max = ratios.iter().cloned().fold(f64::MIN, f64::max);
    let min = ratios.iter().cloned().fold(f64::MAX, f64::min);
    max - min
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// 15-minute-of-day bucket (0..=95) in the timestamp's own offset.
pub fn bucket_15min(dt: &DateTime<FixedOffset>) -> u32 {
    (dt.hour() * 60 + dt.minute()) / 15
}

/// Historical median ratio for the same weekday and 15-minute bucket,
/// computed over a bounded recent history window. Absent (not zero) when no
/// qualifying samples exist yet.
pub fn baseline_ratio(
    history: &[(String, Option<f64>, Option<f64>)],
    weekday: Weekday,
    bucket: u32,
    offset: FixedOffset,
) -> Option<f64> {
    let mut values = Vec::new();
    for (ts_utc, current, freeflow) in history {
        let Some(ratio) = speed_ratio(*current, *freeflow) else {
            continue;
        };
        let Some(dt) = parse_dt(ts_utc) else {
            continue;
        };
        let local = dt.with_timezone(&offset);
        if local.weekday() != weekday || bucket_15min(&local) != bucket {
            continue;
        }
        values.push(ratio);
    }
    median(&values)
}

/// Population standard deviation. Zero for fewer than two values.
pub fn pstdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outlook {
    pub rain_likely: bool,
    pub max_pop: f64,
}

fn hourly_entries(payload: &Value) -> Option<&Vec<Value>> {
    let hourly = payload.get("hourly")?.as_array()?;
    if hourly.is_empty() {
        None
    } else {
        Some(hourly)
    }
}

fn rain_mm_1h(entry: &Value) -> f64 {
    entry
        .get("rain")
        .and_then(|r| r.get("1h"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn weather_main(entry: &Value) -> String {
    entry
        .get("weather")
        .and_then(|w| w.get(0))
        .and_then(|w| w.get("main"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase()
}

/// Max precipitation probability across the next 3 forecast hours.
/// Absent when the payload has no usable hourly probabilities.
pub fn max_pop_next_3h(payload: Option<&Value>) -> Option<f64> {
    let hourly = hourly_entries(payload?)?;
    let mut max_pop: Option<f64> = None;
    for entry in hourly.iter().take(3) {
        if let Some(pop) = entry.get("pop").and_then(Value::as_f64) {
            max_pop = Some(max_pop.map_or(pop, |m: f64| m.max(pop)));
        }
    }
    max_pop
}

/// Rain outlook over the next 3 forecast hours: likely when any hour shows
/// pop >= 0.5, rain >= 0.2mm, or a "rain" weather classification.
pub fn outlook_next_3h(payload: Option<&Value>) -> Option<Outlook> {
    let hourly = hourly_entries(payload?)?;
    let mut max_pop = 0.0f64;
    let mut rain_likely = false;
    for entry in hourly.iter().take(3) {
        let pop = entry.get("pop").and_then(Value::as_f64).unwrap_or(0.0);
        max_pop = max_pop.max(pop);
        if pop >= 0.5 || rain_mm_1h(entry) >= 0.2 || weather_main(entry).contains("rain") {
            rain_likely = true;
        }
    }
    Some(Outlook {
        rain_likely,
        max_pop,
    })
}

/// Whether the payload's `current` block shows rain right now, with a
/// human-readable reason for the card's internals.
pub fn rain_now(payload: Option<&Value>) -> (bool, String) {
    let Some(payload) = payload else {
        return (false, "No weather data available.".to_string());
    };
    let current = payload.get("current").cloned().unwrap_or(Value::Null);
    let main = weather_main(&current);
    let rain_mm = rain_mm_1h(&current);
    if main.contains("rain") || rain_mm >= 0.2 {
        (true, "Rain detected.".to_string())
    } else {
        (false, "No rain detected.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_dt_accepts_offset_z_and_naive() {
        assert!(parse_dt("2026-01-06T19:12:34-05:00").is_some());
        assert!(parse_dt("2026-01-06T19:12:34Z").is_some());
        assert!(parse_dt("2026-01-06T19:12:34.123456").is_some());
        assert!(parse_dt("not a timestamp").is_none());
        assert!(parse_dt("").is_none());
    }

    #[test]
    fn speed_ratio_requires_positive_freeflow() {
        assert_eq!(speed_ratio(Some(30.0), Some(60.0)), Some(0.5));
        assert_eq!(speed_ratio(Some(30.0), Some(0.0)), None);
        assert_eq!(speed_ratio(None, Some(60.0)), None);
        assert_eq!(speed_ratio(Some(30.0), None), None);
    }

    #[test]
    fn volatility_needs_four_samples() {
        assert_eq!(ratio_volatility(&[0.9, 0.5, 0.7]), 0.0);
        let vol = ratio_volatility(&[0.9, 0.5, 0.7, 0.8]);
        assert!((vol - 0.4).abs() < 1e-9);
    }

    #[test]
    fn median_handles_odd_and_even_lengths() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn baseline_filters_weekday_and_bucket() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        // 2026-01-05 is a Monday; 19:10 local = 00:10 UTC next day.
        let history = vec![
            ("2026-01-06T00:10:00Z".to_string(), Some(45.0), Some(60.0)),
            ("2026-01-13T00:12:00Z".to_string(), Some(54.0), Some(60.0)),
            // Same bucket, different weekday (Tuesday local).
            ("2026-01-07T00:10:00Z".to_string(), Some(6.0), Some(60.0)),
            // Same weekday, different bucket.
            ("2026-01-06T02:00:00Z".to_string(), Some(6.0), Some(60.0)),
            // Unusable rows are ignored.
            ("garbage".to_string(), Some(30.0), Some(60.0)),
            ("2026-01-06T00:11:00Z".to_string(), None, Some(60.0)),
        ];
        let bucket = (19 * 60 + 10) / 15;
        let base = baseline_ratio(&history, Weekday::Mon, bucket, offset).unwrap();
        assert!((base - 0.825).abs() < 1e-9);
    }

    #[test]
    fn baseline_absent_without_samples() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(baseline_ratio(&[], Weekday::Mon, 10, offset), None);
    }

    #[test]
    fn pstdev_matches_population_formula() {
        assert_eq!(pstdev(&[]), 0.0);
        assert_eq!(pstdev(&[5.0]), 0.0);
        let sd = pstdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.0).abs() < 1e-9);
    }

    #[test]
    fn max_pop_uses_first_three_hours() {
        let payload = json!({
            "hourly": [
                {"pop": 0.1},
                {"pop": 0.65},
                {"pop": 0.2},
                {"pop": 0.99}
            ]
        });
        assert_eq!(max_pop_next_3h(Some(&payload)), Some(0.65));
        assert_eq!(max_pop_next_3h(None), None);
        assert_eq!(max_pop_next_3h(Some(&json!({"hourly": []}))), None);
        assert_eq!(max_pop_next_3h(Some(&json!({"hourly": [{}]}))), None);
    }

    #[test]
    fn outlook_flags_rain_from_pop_mm_or_classification() {
        let by_pop = json!({"hourly": [{"pop": 0.5}]});
        assert!(outlook_next_3h(Some(&by_pop)).unwrap().rain_likely);

        let by_mm = json!({"hourly": [{"pop": 0.0, "rain": {"1h": 0.3}}]});
        assert!(outlook_next_3h(Some(&by_mm)).unwrap().rain_likely);

        let by_main = json!({"hourly": [{"weather": [{"main": "Rain"}]}]});
        assert!(outlook_next_3h(Some(&by_main)).unwrap().rain_likely);

        let dry = json!({"hourly": [{"pop": 0.1, "weather": [{"main": "Clouds"}]}]});
        let outlook = outlook_next_3h(Some(&dry)).unwrap();
        assert!(!outlook.rain_likely);
        assert!((outlook.max_pop - 0.1).abs() < 1e-9);
    }

    #[test]
    fn rain_now_reads_the_current_block() {
        let raining = json!({"current": {"weather": [{"main": "Rain"}]}});
        let (flag, reason) = rain_now(Some(&raining));
        assert!(flag);
        assert_eq!(reason, "Rain detected.");

        let drizzle = json!({"current": {"rain": {"1h": 0.25}}});
        assert!(rain_now(Some(&drizzle)).0);

        let clear = json!({"current": {"weather": [{"main": "Clear"}]}});
        assert!(!rain_now(Some(&clear)).0);

        let (flag, reason) = rain_now(None);
        assert!(!flag);
        assert_eq!(reason, "No weather data available.");
    }
}
