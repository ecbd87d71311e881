#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

const ITEM: &str = "11111111-1111-1111-1111-111111111111";

fn cmd() -> Command {
    Command::cargo_bin("repair-tree").unwrap()
}

fn monthly(id: &str, start: &str, end: &str, amount: &str) -> String {
    format!(
        r#"{{"id":"{id}","startDate":"{start}","endDate":"{end}","amount":{amount},"currency":"USD","planName":"basic","phaseName":"evergreen","rate":12.00}}"#
    )
}

fn repair(id: &str, start: &str, end: &str, amount: &str) -> String {
    format!(
        r#"{{"id":"{id}","startDate":"{start}","endDate":"{end}","amount":{amount},"currency":"USD","linkedId":"{ITEM}"}}"#
    )
}

fn scenario(existing: &[String], proposed: &[String]) -> String {
    format!(
        r#"{{"subscriptionId":"22222222-2222-2222-2222-222222222222","existing":[{}],"proposed":[{}]}}"#,
        existing.join(","),
        proposed.join(",")
    )
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// ── view ────────────────────────────────────────────────────────────────────

#[test]
fn test_view_cancellation_at_day_25() {
    let input = scenario(
        &[monthly(ITEM, "2014-01-01", "2014-02-01", "12.00")],
        &[monthly(
            "33333333-3333-3333-3333-333333333333",
            "2014-01-01",
            "2014-01-25",
            "9.29",
        )],
    );
    let output = cmd()
        .args(["view", "-"])
        .write_stdin(input)
        .output()
        .unwrap();
    assert!(output.status.success());
    let view = stdout_json(&output);
    assert_eq!(view.as_array().unwrap().len(), 1);
    assert_eq!(view[0]["action"], "CANCEL");
    assert_eq!(view[0]["linkedId"], ITEM);
    assert_eq!(view[0]["startDate"], "2014-01-25");
    assert_eq!(view[0]["amount"].to_string(), "-2.71");
}

#[test]
fn test_view_fully_adjusted_emits_zero() {
    let input = format!(
        r#"{{"existing":[{}],"adjustments":[{{"targetId":"{ITEM}","amount":-12.00}}],"proposed":[{}]}}"#,
        monthly(ITEM, "2014-01-01", "2014-02-01", "12.00"),
        monthly(
            "33333333-3333-3333-3333-333333333333",
            "2014-01-01",
            "2014-01-25",
            "9.29"
        ),
    );
    let output = cmd().args(["view", "-"]).write_stdin(input).output().unwrap();
    assert!(output.status.success());
    let view = stdout_json(&output);
    assert_eq!(view[0]["amount"].to_string(), "0.00");
}

#[test]
fn test_view_pretty() {
    let input = scenario(&[monthly(ITEM, "2014-01-01", "2014-02-01", "12.00")], &[]);
    cmd()
        .args(["view", "-", "--pretty"])
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\n  {"))
        .stdout(predicate::str::contains("-12.00"));
}

// ── current ─────────────────────────────────────────────────────────────────

#[test]
fn test_current_with_two_blocked_periods() {
    let input = scenario(
        &[
            monthly(ITEM, "2014-01-01", "2014-02-01", "12.00"),
            repair(
                "44444444-4444-4444-4444-444444444444",
                "2014-01-08",
                "2014-01-10",
                "-0.77",
            ),
            repair(
                "55555555-5555-5555-5555-555555555555",
                "2014-01-17",
                "2014-01-23",
                "-2.32",
            ),
        ],
        &[],
    );
    let output = cmd().args(["current", "-"]).write_stdin(input).output().unwrap();
    assert!(output.status.success());
    let amounts: Vec<String> = stdout_json(&output)
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["amount"].to_string())
        .collect();
    assert_eq!(amounts, vec!["2.71", "2.71", "3.48"]);
}

#[test]
fn test_current_rounding_flag() {
    let input = scenario(
        &[
            monthly(ITEM, "2014-01-01", "2014-02-01", "12.00"),
            repair(
                "44444444-4444-4444-4444-444444444444",
                "2014-01-23",
                "2014-02-01",
                "-3.48",
            ),
        ],
        &[],
    );
    // 12.00 × 22/31 = 8.516…
    let output = cmd()
        .args(["current", "-", "--rounding", "down"])
        .write_stdin(input)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)[0]["amount"].to_string(), "8.51");
}

// ── tree ────────────────────────────────────────────────────────────────────

#[test]
fn test_tree_prints_nested_arrays() {
    let input = scenario(
        &[
            monthly(ITEM, "2014-01-01", "2014-02-01", "12.00"),
            repair(
                "44444444-4444-4444-4444-444444444444",
                "2014-01-08",
                "2014-01-10",
                "-0.77",
            ),
        ],
        &[],
    );
    let output = cmd()
        .args(["tree", "-", "--decimals", "3"])
        .write_stdin(input)
        .output()
        .unwrap();
    assert!(output.status.success());
    let tree = stdout_json(&output);
    assert_eq!(tree[0]["start"], "2014-01-01");
    assert_eq!(tree[0]["items"][0]["amount"].to_string(), "12.000");
    assert_eq!(tree[1][0]["items"][0]["action"], "CANCEL");
    assert_eq!(tree[1][0]["items"][0]["amount"].to_string(), "-0.770");
}

// ── errors ──────────────────────────────────────────────────────────────────

#[test]
fn test_double_billing_fails() {
    let input = scenario(
        &[
            monthly(ITEM, "2012-05-01", "2012-06-01", "12.00"),
            monthly(
                "66666666-6666-6666-6666-666666666666",
                "2012-05-02",
                "2012-06-01",
                "12.00",
            ),
        ],
        &[],
    );
    cmd()
        .args(["current", "-"])
        .write_stdin(input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Double billing"));
}

#[test]
fn test_stale_repair_dropped_or_rejected() {
    let input = scenario(
        &[
            monthly(ITEM, "2014-01-01", "2014-02-01", "12.00"),
            repair(
                "44444444-4444-4444-4444-444444444444",
                "2013-12-25",
                "2014-01-10",
                "-3.48",
            ),
        ],
        &[],
    );
    cmd()
        .args(["current", "-"])
        .write_stdin(input.clone())
        .assert()
        .success()
        .stderr(predicate::str::contains("dropping stale repair"));
    cmd()
        .args(["current", "-", "--reject-stale-repairs"])
        .write_stdin(input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Dangling repair"));
}

#[test]
fn test_missing_file_fails() {
    cmd()
        .args(["view", "/nonexistent/scenario.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_invalid_json_fails() {
    cmd()
        .args(["view", "-"])
        .write_stdin("{not json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse scenario JSON"));
}

#[test]
fn test_view_passes_new_fixed_item_through() {
    let setup = r#"{"id":"77777777-7777-7777-7777-777777777777","startDate":"2014-01-01","endDate":"2014-01-02","amount":5.00,"currency":"USD","kind":"FIXED"}"#;
    let input = scenario(
        &[monthly(ITEM, "2014-01-01", "2014-02-01", "12.00")],
        &[
            monthly(
                "33333333-3333-3333-3333-333333333333",
                "2014-01-01",
                "2014-02-01",
                "12.00",
            ),
            setup.to_string(),
        ],
    );
    let output = cmd().args(["view", "-"]).write_stdin(input).output().unwrap();
    assert!(output.status.success());
    let view = stdout_json(&output);
    assert_eq!(view.as_array().unwrap().len(), 1);
    assert_eq!(view[0]["kind"], "FIXED");
    assert_eq!(view[0]["action"], "ADD");
    assert_eq!(view[0]["amount"].to_string(), "5.00");
}
