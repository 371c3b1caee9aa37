//! End-to-end command runs against a mock Task/List API

use serde_json::{json, Value};
use taskboard_cli::{execute, CliConfig, Commands, EXIT_FAILED, EXIT_OK};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_with_lists() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lists/L1/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "A", "list_id": "L1", "position": 2.0, "title": "Second"},
            {"id": "T", "list_id": "L1", "position": 1.0, "title": "First"},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/lists/L2/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "B", "list_id": "L2", "position": 1.0},
        ])))
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer) -> CliConfig {
    let mut config = CliConfig::default();
    config.api.base_url = format!("{}/api/", server.uri());
    config
}

fn move_command(task: &str, from: &str, to: &str) -> Commands {
    Commands::Move {
        task: task.into(),
        from: from.into(),
        to: to.into(),
        index: None,
    }
}

#[test_log::test(tokio::test)]
async fn test_list_prints_tasks_in_order() {
    let server = server_with_lists().await;
    let mut out = Vec::new();

    let code = execute(Commands::List { list: "L1".into() }, &config(&server), &mut out)
        .await
        .unwrap();

    assert_eq!(code, EXIT_OK);
    let printed: Value = serde_json::from_slice(&out).unwrap();
    let ids: Vec<&str> = printed
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["T", "A"]);
}

#[test_log::test(tokio::test)]
async fn test_confirmed_move_exits_zero() {
    let server = server_with_lists().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/T/move"))
        .and(body_partial_json(json!({
            "targetListId": "L2",
            "targetIndex": 1,
            "sourceListId": "L1",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "T", "list_id": "L2", "position": 2.0
        })))
        .expect(1)
        .mount(&server)
        .await;
    let mut out = Vec::new();

    let code = execute(move_command("T", "L1", "L2"), &config(&server), &mut out)
        .await
        .unwrap();

    assert_eq!(code, EXIT_OK);
    let printed: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(printed["outcome"], "confirmed");
    assert_eq!(printed["placement"]["list_id"], "L2");
}

#[test_log::test(tokio::test)]
async fn test_conflict_exits_one() {
    let server = server_with_lists().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/T/move"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "message": "task was moved",
            "current": {"id": "T", "list_id": "L3", "position": 5.0}
        })))
        .mount(&server)
        .await;
    let mut out = Vec::new();

    let code = execute(move_command("T", "L1", "L2"), &config(&server), &mut out)
        .await
        .unwrap();

    assert_eq!(code, EXIT_FAILED);
    let printed: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(printed["outcome"], "conflict");
}

#[test_log::test(tokio::test)]
async fn test_invalid_move_never_reaches_server() {
    let server = server_with_lists().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/B/move"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let mut out = Vec::new();

    // B lives in L2, not L1
    let code = execute(move_command("B", "L1", "L2"), &config(&server), &mut out)
        .await
        .unwrap();

    assert_eq!(code, EXIT_FAILED);
    assert!(out.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_unreachable_list_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lists/L1/tasks"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let mut out = Vec::new();

    let result = execute(Commands::List { list: "L1".into() }, &config(&server), &mut out).await;
    assert!(result.is_err());
}
