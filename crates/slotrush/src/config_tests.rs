// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use chrono::FixedOffset;
use yare::parameterized;

use super::*;

fn seoul_morning() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(9 * 3600)
        .unwrap()
        .with_ymd_and_hms(2026, 2, 23, 9, 30, 0)
        .unwrap()
}

fn leak_path(file: &tempfile::NamedTempFile) -> &'static str {
    Box::leak(file.path().to_string_lossy().into_owned().into_boxed_str())
}

fn base_args() -> Vec<&'static str> {
    vec!["slotrush", "--target", "10:00", "--session-id", "s", "--monitor-id", "w"]
}

#[parameterized(
    rfc3339 = { "2026-02-23T10:00:00+09:00", "2026-02-23T01:00:00Z" },
    rfc3339_utc = { "2026-02-23T01:00:00.250Z", "2026-02-23T01:00:00.250Z" },
    clock_minutes = { "10:00", "2026-02-23T01:00:00Z" },
    clock_seconds = { "10:00:30", "2026-02-23T01:00:30Z" },
    clock_millis = { "09:59:59.900", "2026-02-23T00:59:59.900Z" },
    already_passed = { "08:00", "2026-02-22T23:00:00Z" },
)]
fn parses_target(input: &str, expected: &str) {
    let expected = DateTime::parse_from_rfc3339(expected).unwrap().with_timezone(&Utc);
    assert_eq!(parse_target(input, &seoul_morning()).unwrap(), expected);
}

#[parameterized(
    empty = { "" },
    words = { "ten o'clock" },
    bad_hour = { "25:00" },
)]
fn rejects_bad_target(input: &str) {
    assert!(parse_target(input, &seoul_morning()).is_err());
}

#[parameterized(
    plain = { "CSE101:1", "CSE101", "1" },
    padded = { " MAT202 : 03 ", "MAT202", "03" },
)]
fn parses_item(input: &str, resource: &str, section: &str) {
    assert_eq!(parse_item(input).unwrap(), WorkItem::new(resource, section));
}

#[parameterized(
    no_colon = { "CSE101" },
    empty_section = { "CSE101:" },
    empty_resource = { ":1" },
)]
fn rejects_bad_item(input: &str) {
    assert!(parse_item(input).is_err());
}

#[test]
fn cli_parses_items_and_priority() {
    let mut args = base_args();
    args.extend(["--item", "CSE101:1", "--item", "MAT202:2", "--priority", "MAT202,CSE101"]);
    let config = RushConfig::try_parse_from(args).unwrap();

    assert_eq!(config.items, vec![WorkItem::new("CSE101", "1"), WorkItem::new("MAT202", "2")]);
    assert_eq!(config.priority, vec!["MAT202", "CSE101"]);
    assert_eq!(config.concurrency, 10);
    assert_eq!(config.campus_code, "CMN001.0001");
    config.validate().unwrap();
}

#[test]
fn cli_rejects_malformed_item() {
    let mut args = base_args();
    args.extend(["--item", "CSE101"]);
    assert!(RushConfig::try_parse_from(args).is_err());
}

#[parameterized(
    no_items = { &[] },
    zero_concurrency = { &["--item", "A:1", "--concurrency", "0"] },
    zero_timeout = { &["--item", "A:1", "--first-timeout-ms", "0"] },
    offsets_inverted = { &["--item", "A:1", "--final-check-offset-ms", "20000"] },
    bad_base_url = { &["--item", "A:1", "--base-url", "nope"] },
    bad_log_format = { &["--item", "A:1", "--log-format", "xml"] },
    zero_refresh_period = { &["--item", "A:1", "--refresh-period-ms", "0"] },
)]
fn validate_rejects(extra: &[&'static str]) {
    let mut args = base_args();
    args.extend_from_slice(extra);
    let config = RushConfig::try_parse_from(args).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn validate_requires_credentials() {
    let config =
        RushConfig::try_parse_from(["slotrush", "--target", "10:00", "--item", "A:1"]).unwrap();
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("--login-command"), "{err}");

    let config = RushConfig::try_parse_from([
        "slotrush",
        "--target",
        "10:00",
        "--item",
        "A:1",
        "--login-command",
        "./login.sh",
    ])
    .unwrap();
    config.validate().unwrap();
}

#[test]
fn settings_merge_workload_and_flags() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "items": {{"CSE101": 1, "MAT202": "02", "PHY110": 3}},
            "priority": ["PHY110"],
            "pacing": {{"first_interval_ms": 20, "peak_item_limit": 2}}
        }}"#
    )
    .unwrap();

    let path = leak_path(&file);
    let mut args = base_args();
    args.extend(["--item", "MAT202:5", "--item", "ENG300:1", "--workload", path]);
    let config = RushConfig::try_parse_from(args).unwrap();

    let settings = Settings::from_config(&config, &seoul_morning()).unwrap();
    let ids: Vec<String> = settings.items.iter().map(ToString::to_string).collect();
    assert_eq!(ids, ["CSE101/1", "MAT202/5", "PHY110/3", "ENG300/1"]);
    assert_eq!(settings.priority, vec!["PHY110"]);
    assert_eq!(settings.pacing.first_interval_ms, 20);
    assert_eq!(settings.pacing.peak_item_limit, 2);
    // Fields absent from the file keep their defaults.
    assert_eq!(settings.pacing.first_jitter_ms, 10);
    assert_eq!(settings.pacing.early, DelayBand::new(500, 1_000));
    assert_eq!(settings.target.to_rfc3339(), "2026-02-23T01:00:00+00:00");
}

#[test]
fn settings_flag_priority_overrides_workload() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"items": {{"A": 1, "B": 1}}, "priority": ["B"]}}"#).unwrap();

    let path = leak_path(&file);
    let mut args = base_args();
    args.extend(["--priority", "A", "--workload", path]);
    let config = RushConfig::try_parse_from(args).unwrap();

    let settings = Settings::from_config(&config, &seoul_morning()).unwrap();
    assert_eq!(settings.priority, vec!["A"]);
}

#[test]
fn settings_report_missing_workload_file() {
    let mut args = base_args();
    args.extend(["--workload", "/nonexistent/slotrush.json"]);
    let config = RushConfig::try_parse_from(args).unwrap();

    let err = format!("{:#}", Settings::from_config(&config, &seoul_morning()).unwrap_err());
    assert!(err.contains("failed to load workload"), "{err}");
}

#[parameterized(
    first = { 1, 500, 1_000 },
    third = { 3, 500, 1_000 },
    fourth = { 4, 1_000, 2_000 },
    tenth = { 10, 1_000, 2_000 },
    eleventh = { 11, 2_000, 3_000 },
)]
fn band_widens_with_attempts(attempts: u64, min_ms: u64, max_ms: u64) {
    assert_eq!(Pacing::default().band_for(attempts), DelayBand::new(min_ms, max_ms));
}

#[test]
fn cycle_band_shortens_after_target() {
    let pacing = Pacing::default();
    assert_eq!(pacing.cycle_band(20, Some(Duration::from_secs(5))), DelayBand::new(100, 300));
    assert_eq!(pacing.cycle_band(20, Some(Duration::from_secs(31))), DelayBand::new(2_000, 3_000));
    assert_eq!(pacing.cycle_band(2, None), DelayBand::new(500, 1_000));
}

#[test]
fn samples_stay_in_band() {
    let band = DelayBand::new(100, 300);
    for _ in 0..200 {
        let d = band.sample();
        assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300), "{d:?}");
    }
    let pacing = Pacing::default();
    for _ in 0..200 {
        let d = pacing.first_interval();
        assert!(d >= Duration::from_millis(40) && d <= Duration::from_millis(60), "{d:?}");
    }
}

#[test]
fn zero_pacing_never_waits() {
    let pacing = Pacing::zero();
    assert_eq!(pacing.first_interval(), Duration::ZERO);
    assert_eq!(pacing.band_for(50).sample(), Duration::ZERO);
    assert_eq!(pacing.retry_pause(), Duration::ZERO);
    assert_eq!(pacing.peak_item_limit, 3);
}
