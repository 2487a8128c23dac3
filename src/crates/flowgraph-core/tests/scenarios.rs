//! End-to-end scenarios over the public engine API

use serde_json::json;

use flowgraph_core::{Engine, Limits, Payload, WorkflowError};

fn engine() -> Engine {
    Engine::new(Limits::default()).expect("builtin registry")
}

/// Age routing payload: age -> check, check -true-> profile -> sports,
/// check -false-> edu.
fn age_routing(age: i64) -> Payload {
    Payload::from_json(&format!(
        r#"{{
            "nodes": [
                {{"id": "age", "data": {{"value": {age}}}}},
                {{"id": "check", "data": {{"condition": "input >= 18"}}}},
                {{"id": "profile", "type": "text_input", "data": {{"text": "ok"}}}},
                {{"id": "sports", "type": "text_input", "data": {{"text": "sports"}}}},
                {{"id": "edu", "type": "text_input", "data": {{"text": "edu"}}}}
            ],
            "edges": [
                {{"id": "e1", "source": "age", "target": "check"}},
                {{"id": "e2", "source": "check", "target": "profile", "sourceHandle": "true"}},
                {{"id": "e3", "source": "profile", "target": "sports"}},
                {{"id": "e4", "source": "check", "target": "edu", "sourceHandle": "false"}}
            ]
        }}"#
    ))
    .expect("payload parses")
}

#[tokio::test]
async fn age_routing_adult_takes_true_branch() {
    let report = engine().execute(&age_routing(25)).await.unwrap();
    assert_eq!(report.status, "ok");

    let executed: Vec<&str> = ["age", "check", "profile", "sports", "edu"]
        .into_iter()
        .filter(|id| report.node_results.contains_key(*id))
        .collect();
    assert_eq!(executed, vec!["age", "check", "profile", "sports"]);
    assert_eq!(report.counters.node_exec, 4);
}

#[tokio::test]
async fn age_routing_minor_skips_true_branch_transitively() {
    let report = engine().execute(&age_routing(15)).await.unwrap();
    assert_eq!(report.status, "ok");

    assert!(report.node_results.contains_key("age"));
    assert!(report.node_results.contains_key("check"));
    assert!(report.node_results.contains_key("edu"));
    // profile is path-terminated; sports follows it transitively over an
    // unconditional edge.
    assert!(!report.node_results.contains_key("profile"));
    assert!(!report.node_results.contains_key("sports"));
    assert_eq!(report.counters.node_exec, 3);
}

#[tokio::test]
async fn switch_routes_only_the_matching_handler() {
    let payload = Payload::from_json(
        r#"{
            "nodes": [
                {"id": "status", "data": {"value": 404}},
                {"id": "route", "data": {"cases": [
                    {"when": "input == 200", "value": 200, "output_path": "ok"},
                    {"when": "input == 404", "value": 404, "output_path": "nf"},
                    {"when": "input >= 500", "output_path": "err"}
                ], "default_path": "other"}},
                {"id": "h_ok", "type": "text_input", "data": {"text": "ok"}},
                {"id": "h_nf", "type": "text_input", "data": {"text": "not found"}},
                {"id": "h_err", "type": "text_input", "data": {"text": "server error"}},
                {"id": "h_other", "type": "text_input", "data": {"text": "other"}}
            ],
            "edges": [
                {"id": "e1", "source": "status", "target": "route"},
                {"id": "e2", "source": "route", "target": "h_ok", "sourceHandle": "ok"},
                {"id": "e3", "source": "route", "target": "h_nf", "sourceHandle": "nf"},
                {"id": "e4", "source": "route", "target": "h_err", "sourceHandle": "err"},
                {"id": "e5", "source": "route", "target": "h_other", "sourceHandle": "other"}
            ]
        }"#,
    )
    .unwrap();

    let report = engine().execute(&payload).await.unwrap();
    assert_eq!(report.node_results["route"]["output_path"], json!("nf"));
    assert!(report.node_results.contains_key("h_nf"));
    assert!(!report.node_results.contains_key("h_ok"));
    assert!(!report.node_results.contains_key("h_err"));
    assert!(!report.node_results.contains_key("h_other"));
}

#[tokio::test]
async fn filter_expression_over_objects() {
    let payload = Payload::from_json(
        r#"{
            "nodes": [
                {"id": "people", "type": "parse", "data": {"format": "json"}},
                {"id": "seed", "type": "text_input",
                 "data": {"text": "[{\"age\":25},{\"age\":15},{\"age\":30}]"}},
                {"id": "adults", "type": "filter", "data": {"condition": "item.age >= 18"}}
            ],
            "edges": [
                {"id": "e1", "source": "seed", "target": "people"},
                {"id": "e2", "source": "people", "target": "adults"}
            ]
        }"#,
    )
    .unwrap();

    let report = engine().execute(&payload).await.unwrap();
    let out = &report.node_results["adults"];
    assert_eq!(out["filtered"], json!([{"age": 25}, {"age": 30}]));
    assert_eq!(out["input_count"], json!(3));
    assert_eq!(out["output_count"], json!(2));
    assert_eq!(out["skipped_count"], json!(1));
    assert_eq!(out["error_count"], json!(0));
    assert_eq!(out["is_array"], json!(true));
}

#[tokio::test]
async fn reduce_sums_a_range() {
    let payload = Payload::from_json(
        r#"{
            "nodes": [
                {"id": "seq", "type": "range", "data": {"start": 1, "end": 6}},
                {"id": "total", "type": "reduce",
                 "data": {"expression": "accumulator + item", "initial_value": 0}}
            ],
            "edges": [{"id": "e1", "source": "seq", "target": "total"}]
        }"#,
    )
    .unwrap();

    let report = engine().execute(&payload).await.unwrap();
    let out = &report.node_results["total"];
    assert_eq!(out["result"], json!(15.0));
    assert_eq!(out["iterations"], json!(5));
    assert_eq!(out["successful"], json!(5));
    assert_eq!(out["failed"], json!(0));
}

#[tokio::test]
async fn ssrf_block_fails_the_node_without_retries() {
    let payload = Payload::from_json(
        r#"{
            "nodes": [
                {"id": "fetch", "data": {"url": "http://169.254.169.254/latest/meta-data/"}}
            ],
            "edges": []
        }"#,
    )
    .unwrap();

    let report = engine().execute(&payload).await.unwrap();
    assert_eq!(report.status, "failed");
    let errors = report.errors.unwrap();
    assert_eq!(errors[0].kind, "SSRFBlocked");
    assert_eq!(errors[0].node_id.as_deref(), Some("fetch"));
    // One attempt only: SSRF blocks are non-retryable.
    assert_eq!(report.counters.http_calls, 1);
    assert!(!report.node_results.contains_key("fetch"));
}

#[tokio::test]
async fn upstream_results_visible_downstream() {
    // Invariant: for every executed node, every transitively-upstream
    // executed node is also present in the result map.
    let payload = age_routing(25);
    let report = engine().execute(&payload).await.unwrap();
    for id in report.node_results.keys() {
        match id.as_str() {
            "sports" => {
                assert!(report.node_results.contains_key("profile"));
                assert!(report.node_results.contains_key("check"));
                assert!(report.node_results.contains_key("age"));
            }
            "check" => assert!(report.node_results.contains_key("age")),
            _ => {}
        }
    }
}

#[tokio::test]
async fn identical_payloads_replay_identically() {
    let engine = engine();
    let payload = Payload::from_json(
        r#"{
            "nodes": [
                {"id": "seq", "type": "range", "data": {"start": 0, "end": 10}},
                {"id": "evens", "type": "filter", "data": {"condition": "item % 2 == 0"}},
                {"id": "squares", "type": "map", "data": {"expression": "item * item"}},
                {"id": "total", "type": "reduce", "data": {"expression": "accumulator + item"}}
            ],
            "edges": [
                {"id": "e1", "source": "seq", "target": "evens"},
                {"id": "e2", "source": "evens", "target": "squares"},
                {"id": "e3", "source": "squares", "target": "total"}
            ]
        }"#,
    )
    .unwrap();

    let first = engine.execute(&payload).await.unwrap();
    let second = engine.execute(&payload).await.unwrap();
    assert_eq!(first.node_results, second.node_results);
    assert_eq!(first.final_output, second.final_output);
    assert_eq!(first.node_results["total"]["result"], json!(120.0));
}

#[tokio::test]
async fn node_budget_bounds_counters() {
    let limits = Limits {
        max_node_executions: 3,
        ..Limits::default()
    };
    let engine = Engine::new(limits).unwrap();
    let payload = age_routing(25); // would need 4 executions
    let report = engine.execute(&payload).await.unwrap();
    assert_eq!(report.status, "failed");
    assert!(report.counters.node_exec <= 4);
    assert_eq!(report.errors.unwrap()[0].kind, "BudgetError");
}

#[tokio::test]
async fn legacy_condition_edges_still_route() {
    let payload = Payload::from_json(
        r#"{
            "nodes": [
                {"id": "n", "data": {"value": 1}},
                {"id": "check", "data": {"condition": "input > 0"}},
                {"id": "yes", "type": "text_input", "data": {"text": "y"}}
            ],
            "edges": [
                {"id": "e1", "source": "n", "target": "check"},
                {"id": "e2", "source": "check", "target": "yes", "condition": "true"}
            ]
        }"#,
    )
    .unwrap();
    let report = engine().execute(&payload).await.unwrap();
    assert!(report.node_results.contains_key("yes"));
}

#[tokio::test]
async fn try_catch_routes_error_objects() {
    let payload = Payload::from_json(
        r#"{
            "nodes": [
                {"id": "n", "data": {"value": 1}},
                {"id": "guard", "type": "try_catch", "data": {"expression": "input / 0"}},
                {"id": "ok", "type": "text_input", "data": {"text": "fine"}},
                {"id": "fallback", "type": "text_input", "data": {"text": "recovered"}}
            ],
            "edges": [
                {"id": "e1", "source": "n", "target": "guard"},
                {"id": "e2", "source": "guard", "target": "ok", "sourceHandle": "try"},
                {"id": "e3", "source": "guard", "target": "fallback", "sourceHandle": "catch"}
            ]
        }"#,
    )
    .unwrap();
    let report = engine().execute(&payload).await.unwrap();
    assert_eq!(report.status, "ok");
    assert!(report.node_results.contains_key("fallback"));
    assert!(!report.node_results.contains_key("ok"));
    assert_eq!(
        report.node_results["guard"]["error"]["kind"],
        json!("EvalError")
    );
}

#[tokio::test]
async fn yaml_payloads_execute_like_json() {
    let payload = Payload::from_yaml(
        r#"
nodes:
  - id: seq
    type: range
    data: {start: 1, end: 4}
  - id: total
    type: reduce
    data: {expression: "accumulator + item"}
edges:
  - {id: e1, source: seq, target: total}
"#,
    )
    .unwrap();
    let report = engine().execute(&payload).await.unwrap();
    assert_eq!(report.node_results["total"]["result"], json!(6.0));
}

#[tokio::test]
async fn validate_reports_without_executing() {
    let engine = engine();
    let payload = Payload::from_json(
        r#"{
            "nodes": [{"id": "c", "type": "condition", "data": {}}],
            "edges": []
        }"#,
    )
    .unwrap();
    let issues = engine.validate(&payload);
    assert!(!issues.is_empty());

    match engine.execute(&payload).await {
        Err(WorkflowError::Validation(list)) => assert_eq!(list.len(), issues.len()),
        other => panic!("expected validation failure, got {:?}", other.map(|r| r.status)),
    }
}
