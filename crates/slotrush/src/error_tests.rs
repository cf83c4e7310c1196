// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    completed = { RunOutcome::Completed, 0 },
    cancelled = { RunOutcome::Cancelled, 130 },
    period_closed = {
        RunOutcome::Fatal { reason: StopReason::PeriodClosed, detail: "closed".to_owned() },
        1
    },
    auth = {
        RunOutcome::Fatal { reason: StopReason::AuthExhausted, detail: "no tokens".to_owned() },
        1
    },
)]
fn exit_codes(outcome: RunOutcome, expected: i32) {
    assert_eq!(outcome.exit_code(), expected);
}

#[test]
fn stop_processing_converts_to_period_closed() {
    let stop = StopProcessing { resource_id: "CSE101".to_owned(), detail: "기간".to_owned() };
    let outcome = RunOutcome::from(stop);
    assert!(outcome.is_fatal());
    match outcome {
        RunOutcome::Fatal { reason, detail } => {
            assert_eq!(reason, StopReason::PeriodClosed);
            assert!(detail.contains("CSE101"));
        }
        other => unreachable!("unexpected outcome {other:?}"),
    }
}

#[test]
fn transport_error_messages_carry_markers() {
    assert_eq!(TransportError::status(502).to_string(), "HTTP Error 502");
    assert!(TransportError::timeout("deadline").to_string().contains("timed out"));
}

#[test]
fn outcome_serializes_with_tag() -> anyhow::Result<()> {
    let json = serde_json::to_value(RunOutcome::Fatal {
        reason: StopReason::AuthExhausted,
        detail: "x".to_owned(),
    })?;
    assert_eq!(json["outcome"], "fatal");
    assert_eq!(json["reason"], "auth_exhausted");
    Ok(())
}
