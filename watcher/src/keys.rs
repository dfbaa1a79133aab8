use chrono::{DateTime, TimeZone, Utc};

fn fmt_ts(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

fn date_str(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y-%m-%d").to_string()
}

/// The single baseline frame of a channel.
/// e.g. "channels/harbour/baseline.png"
pub fn baseline_key(prefix: &str, channel: &str) -> String {
    format!("{prefix}{channel}/baseline.png")
}

/// A recorded clip.
/// e.g. "channels/harbour/clips/2026-02-18/20260218T093000000Z_20260218T093005000Z.mp4"
pub fn clip_key(prefix: &str, channel: &str, start_ms: i64, end_ms: i64, ext: &str) -> String {
    format!(
        "{prefix}{channel}/clips/{date}/{start}_{end}.{ext}",
        date = date_str(start_ms),
        start = fmt_ts(start_ms),
        end = fmt_ts(end_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        // 2025-02-18T09:30:00.000Z
        let start = 1739871000000i64;
        let end = start + 5_000;

        assert_eq!(baseline_key("channels/", "harbour"), "channels/harbour/baseline.png");

        let k = clip_key("channels/", "harbour", start, end, "mp4");
        assert_eq!(
            k,
            "channels/harbour/clips/2025-02-18/20250218T093000000Z_20250218T093005000Z.mp4"
        );
    }

    #[test]
    fn clips_live_beside_the_baseline() {
        let base = baseline_key("p/", "cam");
        let clip = clip_key("p/", "cam", 0, 1, "mkv");
        assert_eq!(&base[..base.rfind('/').unwrap()], "p/cam");
        assert!(clip.starts_with("p/cam/clips/"));
        assert!(clip.ends_with(".mkv"));
    }
}
