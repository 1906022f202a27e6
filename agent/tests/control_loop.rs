//! Loop-level scenarios driven through the scripted doubles.
//!
//! Each test seeds a history, scripts the model's replies and checks what the
//! loop left behind: outcome, history, guard state, logs and handler calls.

use std::fs;

use serde_json::{Value, json};

use build_agent::core::types::{ActionResult, Role};
use build_agent::looping::{BUILD_FAILURE_PROMPT, Escalation, LoopEvent, LoopStop, quota_prompt};
use build_agent::test_support::{
    HarnessRun, ScriptedBuilder, ScriptedConfirm, ScriptedModel, TestHarness, directive,
    reply_with_usage,
};

const REPO_URL: &str = "https://example.com/org/repo";

fn exit_reply() -> String {
    directive("exit", json!({}), "done")
}

fn build_reply() -> String {
    directive("build", json!({"dockerfile": "FROM scratch"}), "building")
}

/// Decode the result the loop fed back after turn `turn` (1-based).
fn result_of_turn(run: &HarnessRun, turn: usize) -> Value {
    let message = &run.history.messages()[1 + 2 * turn];
    assert_eq!(message.role, Role::User);
    serde_json::from_str(&message.content).expect("result json")
}

fn escalations(events: &[LoopEvent]) -> Vec<Escalation> {
    events
        .iter()
        .filter_map(|event| match event {
            LoopEvent::Escalated { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

#[test]
fn clone_then_exit_reports_repo_path_and_writes_summary() {
    let harness = TestHarness::new(ScriptedModel::texts([
        directive("clone_repo", json!({"url": REPO_URL}), "cloning"),
        exit_reply(),
    ]))
    .expect("harness");

    let run = harness.run(REPO_URL).expect("run");

    assert_eq!(run.outcome.stop, LoopStop::Exited);
    assert_eq!(run.outcome.turns, 2);
    let cloned = result_of_turn(&run, 1);
    assert_eq!(cloned["status"], "ok");
    assert!(cloned["repo_path"].as_str().expect("repo_path").ends_with("repo"));
    assert_eq!(harness.cloner.urls(), vec![REPO_URL]);

    let summary = fs::read_to_string(harness.usage_log()).expect("usage log");
    assert_eq!(summary.lines().count(), 1);
    assert!(summary.contains(&format!("tok={}", run.tokens)));
}

#[test]
fn history_grows_by_two_per_turn_and_model_sees_all_of_it() {
    let harness = TestHarness::new(ScriptedModel::texts([
        directive("fix_dockerfile", json!({"dockerfile": "FROM a", "error": "boom"}), "fix"),
        directive("fix_dockerfile", json!({"dockerfile": "FROM b", "error": "boom"}), "fix"),
        exit_reply(),
    ]))
    .expect("harness");

    let run = harness.run(REPO_URL).expect("run");

    assert_eq!(run.history.len(), 2 + 2 * 3);
    let requests = harness.model.requests();
    let sizes: Vec<usize> = requests.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 4, 6]);
    assert_eq!(requests[0][0].role, Role::System);
    assert_eq!(requests[0][1].content, REPO_URL);
    assert_eq!(requests[1][2].role, Role::Assistant);
    assert_eq!(result_of_turn(&run, 2)["status"], "patched");
}

#[test]
fn results_round_trip_through_history() {
    let harness = TestHarness::new(ScriptedModel::texts([
        directive("fix_dockerfile", json!({"dockerfile": "FROM a", "error": "boom"}), ""),
        exit_reply(),
    ]))
    .expect("harness");

    let run = harness.run(REPO_URL).expect("run");

    let decoded: ActionResult =
        serde_json::from_value(result_of_turn(&run, 1)).expect("decode result");
    assert_eq!(decoded.field_str("dockerfile"), Some("FROM a"));
    assert_eq!(decoded.field_str("error"), Some("boom"));
}

#[test]
fn third_consecutive_build_failure_escalates_once_and_resets_counter() {
    let harness = TestHarness::new(ScriptedModel::texts([
        build_reply(),
        build_reply(),
        build_reply(),
        "that did not work, let me think".to_string(),
    ]))
    .expect("harness")
    .with_builder(ScriptedBuilder::new([false, false, false]))
    .with_human(ScriptedConfirm::new(["y"]));

    let run = harness.run(REPO_URL).expect("run");

    assert_eq!(escalations(&run.events), vec![Escalation::BuildFailures]);
    assert_eq!(run.outcome.escalations, 1);
    assert_eq!(harness.human.prompts(), vec![BUILD_FAILURE_PROMPT]);
    assert_eq!(run.consecutive_failures, 0);

    assert_eq!(result_of_turn(&run, 1)["status"], "error");
    assert_eq!(result_of_turn(&run, 2)["status"], "error");
    assert_eq!(result_of_turn(&run, 3), json!({"status": "ok", "answer": "y"}));
}

#[test]
fn successful_build_and_other_actions_reset_failure_count() {
    let harness = TestHarness::new(ScriptedModel::texts([
        build_reply(),
        build_reply(),
        build_reply(),
        directive("fix_dockerfile", json!({}), ""),
        build_reply(),
        build_reply(),
        exit_reply(),
    ]))
    .expect("harness")
    .with_builder(ScriptedBuilder::new([false, false, true, false, false]));

    let run = harness.run(REPO_URL).expect("run");

    assert!(escalations(&run.events).is_empty());
    assert!(harness.human.prompts().is_empty());
    assert_eq!(run.outcome.stop, LoopStop::Exited);
}

#[test]
fn reported_usage_is_added_exactly() {
    let harness =
        TestHarness::new(ScriptedModel::new([reply_with_usage(exit_reply(), 57)])).expect("harness");

    let run = harness.run(REPO_URL).expect("run");

    assert_eq!(run.outcome.tokens, 57);
    let summary = fs::read_to_string(harness.usage_log()).expect("usage log");
    assert!(summary.contains("tok=57 (exact=57 estimated=0)"));
}

#[test]
fn replies_without_usage_are_estimated_from_length() {
    let reply = exit_reply();
    let expected = (reply.chars().count() / 4).max(1) as u64;
    let harness = TestHarness::new(ScriptedModel::texts([reply])).expect("harness");

    let run = harness.run(REPO_URL).expect("run");

    assert_eq!(run.outcome.tokens, expected);
}

#[test]
fn malformed_reply_stops_without_dispatch_or_counter_change() {
    let harness = TestHarness::new(ScriptedModel::texts([
        build_reply(),
        build_reply(),
        "Sure! First I will clone the repository.".to_string(),
        directive("clone_repo", json!({"url": REPO_URL}), "never reached"),
    ]))
    .expect("harness")
    .with_builder(ScriptedBuilder::new([false, false]));

    let run = harness.run(REPO_URL).expect("run");

    let LoopStop::MalformedDirective { error } = &run.outcome.stop else {
        panic!("expected malformed stop, got {:?}", run.outcome.stop);
    };
    assert!(error.contains("not valid json"));
    assert_eq!(run.consecutive_failures, 2);
    assert_eq!(harness.builder.dockerfiles().len(), 2);
    assert!(harness.cloner.urls().is_empty());
    assert_eq!(harness.model.remaining(), 1);
    assert_eq!(run.history.len(), 2 + 2 * 2);
    assert!(matches!(
        run.events.last(),
        Some(LoopEvent::MalformedReply { reply, .. }) if reply.starts_with("Sure!")
    ));

    let audit = fs::read_to_string(harness.actions_log()).expect("actions log");
    let last: Value = serde_json::from_str(audit.lines().last().expect("line")).expect("json");
    assert_eq!(last["action"], "error");
    assert_eq!(last["comment"], "bad json");
}

#[test]
fn quota_breach_prompts_once_resets_and_discards_the_turn() {
    let harness = TestHarness::new(ScriptedModel::new([
        reply_with_usage(build_reply(), 150),
        reply_with_usage(exit_reply(), 10),
    ]))
    .expect("harness")
    .with_token_quota(100)
    .with_human(ScriptedConfirm::new(["y"]));

    let run = harness.run(REPO_URL).expect("run");

    assert_eq!(harness.human.prompts(), vec![quota_prompt(150)]);
    assert_eq!(escalations(&run.events), vec![Escalation::TokenQuota]);
    assert!(harness.builder.dockerfiles().is_empty());
    assert_eq!(result_of_turn(&run, 1), json!({"status": "ok", "answer": "y"}));
    assert_eq!(run.outcome.tokens, 10);
    assert_eq!(run.outcome.stop, LoopStop::Exited);

    let audit = fs::read_to_string(harness.actions_log()).expect("actions log");
    let first: Value = serde_json::from_str(audit.lines().nth(1).expect("line")).expect("json");
    assert_eq!(first["action"], "ask_human");
    assert_eq!(first["comment"], "token-quota reached");
    assert_eq!(first["tokens"], 150);
}

#[test]
fn repeated_quota_breaches_prompt_once_each_and_reset_each_time() {
    let harness = TestHarness::new(ScriptedModel::new([
        reply_with_usage(build_reply(), 150),
        reply_with_usage(build_reply(), 120),
        reply_with_usage(exit_reply(), 10),
    ]))
    .expect("harness")
    .with_token_quota(100)
    .with_human(ScriptedConfirm::new(["y", "y"]));

    let run = harness.run(REPO_URL).expect("run");

    assert_eq!(
        harness.human.prompts(),
        vec![quota_prompt(150), quota_prompt(120)]
    );
    assert_eq!(
        escalations(&run.events),
        vec![Escalation::TokenQuota, Escalation::TokenQuota]
    );
    assert!(harness.builder.dockerfiles().is_empty());
    assert_eq!(result_of_turn(&run, 2), json!({"status": "ok", "answer": "y"}));
    assert_eq!(run.outcome.escalations, 2);
    assert_eq!(run.outcome.turns, 3);
    assert_eq!(run.outcome.tokens, 10);
    assert_eq!(run.outcome.stop, LoopStop::Exited);
}

#[test]
fn unknown_action_is_fed_back_as_error() {
    let harness = TestHarness::new(ScriptedModel::texts([
        directive("deploy", json!({"env": "prod"}), "ship it"),
        exit_reply(),
    ]))
    .expect("harness");

    let run = harness.run(REPO_URL).expect("run");

    let result = result_of_turn(&run, 1);
    assert_eq!(result["status"], "error");
    assert!(result["error"].as_str().expect("error").starts_with("unknown action deploy"));
    assert_eq!(run.outcome.stop, LoopStop::Exited);
}

#[test]
fn empty_action_name_is_fed_back_as_unknown() {
    let harness = TestHarness::new(ScriptedModel::texts([
        directive("", json!({}), "oops"),
        exit_reply(),
    ]))
    .expect("harness");

    let run = harness.run(REPO_URL).expect("run");

    let result = result_of_turn(&run, 1);
    assert_eq!(result["status"], "error");
    assert!(result["error"].as_str().expect("error").starts_with("unknown action "));
    assert_eq!(run.outcome.turns, 2);
    assert_eq!(run.outcome.stop, LoopStop::Exited);
}

#[test]
fn full_build_flow_reaches_exit() {
    let dockerfile = "FROM rust:1\nCOPY . .\nRUN cargo build";
    let mut harness = TestHarness::new(ScriptedModel::default())
        .expect("harness")
        .with_builder(ScriptedBuilder::new([true]));
    let repo_path = harness.workspace_dir().join("repo").display().to_string();
    harness.model = ScriptedModel::texts([
        directive("clone_repo", json!({"url": REPO_URL}), "clone"),
        directive("ingest_filetree", json!({"repo_path": repo_path}), "index files"),
        directive("query_qdrant", json!({"query": "Cargo"}), "look for manifests"),
        directive(
            "generate_dockerfile",
            json!({"dockerfile": dockerfile}),
            "write dockerfile",
        ),
        directive("build", json!({"dockerfile": dockerfile, "tag": "demo"}), "build"),
        exit_reply(),
    ]);

    let run = harness.run(REPO_URL).expect("run");

    assert_eq!(run.outcome.stop, LoopStop::Exited);
    assert_eq!(run.outcome.turns, 6);
    assert_eq!(result_of_turn(&run, 1)["repo_path"], repo_path.as_str());
    assert_eq!(result_of_turn(&run, 2)["result"], "1 chunks");
    assert_eq!(
        result_of_turn(&run, 3)["hits"][0]["text"],
        "Cargo.toml\nsrc/main.rs"
    );
    assert_eq!(result_of_turn(&run, 4)["dockerfile"], dockerfile);
    assert_eq!(result_of_turn(&run, 5)["status"], "ok");
    assert_eq!(harness.builder.dockerfiles(), vec![dockerfile]);

    let audit = fs::read_to_string(harness.actions_log()).expect("actions log");
    assert_eq!(audit.lines().count(), 2 * 6);
}
