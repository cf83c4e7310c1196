// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::*;
use crate::alert::AlertPriority;
use crate::session::Validity;
use crate::test_support::TestRunBuilder;

#[parameterized(
    success = { "true", Outcome::Success },
    success_json = { r#"{"result":true,"msg":"ok"}"#, Outcome::Success },
    full_beats_success = { "초과 true", Outcome::AlreadyFull },
    session_code = { "-3000 session error", Outcome::SessionExpired },
    session_word = { "세션이 만료되었습니다 true", Outcome::SessionExpired },
    login_word = { "로그인이 필요합니다", Outcome::SessionExpired },
    session_beats_full = { "로그인 인원 초과", Outcome::SessionExpired },
    period_closed = { "수강신청 기간이 아닙니다", Outcome::PeriodClosed },
    full_beats_period = { "기간 중 정원 초과", Outcome::AlreadyFull },
    period_beats_success = { "기간 true", Outcome::PeriodClosed },
    empty = { "", Outcome::BlankResponse },
    whitespace = { " \r\n\t ", Outcome::BlankResponse },
    html = { "<html>maintenance</html>", Outcome::Unknown },
    http_error_page = { "HTTP Error 500: internal", Outcome::Unknown },
)]
fn classifies(body: &str, expected: Outcome) {
    assert_eq!(classify(body), expected);
}

#[parameterized(
    ascii = { "abcdef", 3, "abc" },
    shorter = { "ab", 10, "ab" },
    hangul = { "가나다라", 2, "가나" },
    exact = { "가나", 2, "가나" },
)]
fn truncates_on_char_boundary(body: &str, max: usize, expected: &str) {
    assert_eq!(truncate(body, max), expected);
}

fn work() -> WorkSet {
    [WorkItem::new("CSE101", "1"), WorkItem::new("MAT202", "2")].into_iter().collect()
}

#[test]
fn success_removes_item_and_alerts() {
    let run = TestRunBuilder::new().build();
    let mut work = work();
    let item = WorkItem::new("CSE101", "1");

    apply_outcome(&run.ctx, &mut work, &item, Outcome::Success, "true").unwrap();

    assert!(!work.contains("CSE101"));
    assert_eq!(work.len(), 1);
    assert_eq!(run.ctx.stats.successes(), 1);
    let alerts = run.alerts.messages();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].1, AlertPriority::Urgent);
    assert!(alerts[0].0.contains("CSE101/1"));
}

#[test]
fn session_expired_invalidates_and_signals() {
    let run = TestRunBuilder::new().build();
    let mut work = work();
    let item = WorkItem::new("MAT202", "2");

    apply_outcome(&run.ctx, &mut work, &item, Outcome::SessionExpired, "-3000").unwrap();

    assert_eq!(run.ctx.session.validity(), Validity::Invalid);
    assert_eq!(run.ctx.session.refresh_signals(), 1);
    assert!(work.contains("MAT202"));
    assert!(run.alerts.contains("Session expired"));
}

#[test]
fn period_closed_stops_without_touching_work() {
    let run = TestRunBuilder::new().build();
    let mut work = work();
    let before = work.clone();
    let item = WorkItem::new("CSE101", "1");

    let stop = apply_outcome(&run.ctx, &mut work, &item, Outcome::PeriodClosed, "수강신청 기간이 아닙니다")
        .unwrap_err();

    assert_eq!(stop.resource_id, "CSE101");
    assert!(stop.detail.contains("기간"));
    assert_eq!(work, before);
    assert!(run.alerts.contains("period closed"));
}

#[parameterized(
    alerts_when_enabled = { true, 1 },
    quiet_by_default = { false, 0 },
)]
fn already_full_alert_is_configurable(alert_on_full: bool, expected_alerts: usize) {
    let run = TestRunBuilder::new().settings(|s| s.alert_on_full = alert_on_full).build();
    let mut work = work();
    let item = WorkItem::new("CSE101", "1");

    apply_outcome(&run.ctx, &mut work, &item, Outcome::AlreadyFull, "초과").unwrap();

    assert!(work.contains("CSE101"));
    assert_eq!(run.alerts.messages().len(), expected_alerts);
    assert_eq!(run.ctx.session.refresh_signals(), 0);
}

#[test]
fn blank_response_flags_health() {
    let run = TestRunBuilder::new().build();
    let mut work = work();
    let item = WorkItem::new("CSE101", "1");

    apply_outcome(&run.ctx, &mut work, &item, Outcome::BlankResponse, "").unwrap();

    assert!(run.ctx.health.snapshot().blank_response_detected);
    assert_eq!(work.len(), 2);
}

#[test]
fn unknown_changes_nothing() {
    let run = TestRunBuilder::new().build();
    let mut work = work();
    let item = WorkItem::new("CSE101", "1");

    apply_outcome(&run.ctx, &mut work, &item, Outcome::Unknown, r#"{"JSON":{"code":"E99"}}"#).unwrap();

    assert_eq!(work.len(), 2);
    assert_eq!(run.ctx.health.snapshot(), Default::default());
    assert!(run.alerts.messages().is_empty());
    assert_eq!(run.ctx.session.validity(), Validity::Unknown);
}
