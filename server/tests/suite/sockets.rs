use core_test_support::fixtures;
use core_test_support::skip_if_no_compiler;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

use super::Seen;
use super::TestServer;
use super::texts;

#[tokio::test]
async fn input_before_any_run_gets_notice() {
    let server = TestServer::start(|_| {}).await;
    let mut client = server.socket("/terminal").await;

    client.send_text("INPUT:hello").await;
    let seen = client.read_until(|_| true).await;

    assert_eq!(
        seen,
        vec![Seen::Text(
            "OUTPUT: \r\n\u{1b}[31;1mError:\u{1b}[0m No active program running to receive input.\r\n"
                .to_string()
        )]
    );
    client.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn compile_failure_arrives_over_the_socket() {
    let server = TestServer::start(|config| config.compiler.program = "sh".to_string()).await;
    let mut client = server.socket("/terminal").await;

    client.send_text("RUN:echo 'oops' >&2\nexit 4\n").await;
    let seen = client.read_until_text("ERROR:").await;

    assert_eq!(
        texts(&seen),
        vec![
            "BUILD_LOG: Compiling...\n".to_string(),
            "ERROR: Compilation Failed (Exit Code: 4)\noops\n".to_string(),
        ]
    );
    client.close().await;
}

#[tokio::test]
async fn pty_without_file_name_is_rejected_and_closed() {
    let server = TestServer::start(|_| {}).await;
    let mut client = server.socket("/pty").await;

    let seen = client.read_until(|_| false).await;
    assert_eq!(
        seen,
        vec![
            Seen::Text("ERROR: missing/invalid fileName\n".to_string()),
            Seen::Closed,
        ]
    );
}

#[tokio::test]
async fn pty_without_binary_is_rejected_and_closed() {
    let server = TestServer::start(|_| {}).await;
    let mut client = server.socket("/pty?fileName=nothing.c").await;

    let seen = client.read_until(|_| false).await;
    assert_eq!(
        seen,
        vec![
            Seen::Text("ERROR: executable not found. Compile first.\n".to_string()),
            Seen::Closed,
        ]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn pty_streams_binary_output_and_accepts_keystrokes() {
    let server = TestServer::start(|_| {}).await;
    core_test_support::write_script(
        &server.dirs.workspace,
        "greeter",
        "IFS= read -r name\necho \"hello $name\"\nexit 2\n",
    );
    let mut client = server.socket("/pty?fileName=greeter.c").await;

    let started = client.read_until_text("[started]").await;
    assert_eq!(texts(&started), vec!["[started] greeter\n".to_string()]);

    client.send_binary(b"world\n").await;
    let seen = client.read_until_text("[terminal idle").await;

    let screen: String = seen
        .iter()
        .map(|item| match item {
            Seen::Text(text) => text.clone(),
            Seen::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Seen::Closed => String::new(),
        })
        .collect();
    assert!(screen.contains("hello world"), "{screen:?}");
    assert!(
        texts(&seen).contains(&"\r\n[process exited with code 2]\r\n".to_string()),
        "{seen:?}"
    );
    assert!(seen.iter().any(|item| matches!(item, Seen::Binary(_))));
    client.close().await;
}

#[tokio::test]
async fn batch_run_end_to_end() {
    skip_if_no_compiler!();
    let server = TestServer::start(|_| {}).await;
    let mut client = server.socket("/terminal").await;

    client.send_text(&format!("RUN:{}", fixtures::HELLO)).await;
    let seen = client.read_until_text("END:").await;
    let texts = texts(&seen);

    assert!(texts.contains(&"OUTPUT:hello, livecc\n".to_string()), "{texts:?}");
    assert_eq!(texts.last().map(String::as_str), Some("END:SUCCESS"));
    client.close().await;
}

#[tokio::test]
async fn create_save_compile_then_open_pty() {
    skip_if_no_compiler!();
    let server = TestServer::start(|_| {}).await;
    let http = reqwest::Client::new();

    let created: Value = http
        .post(server.url("/api/files/create"))
        .send()
        .await
        .expect("create")
        .json()
        .await
        .expect("create body");
    let file_name = created["fileName"].as_str().expect("fileName").to_string();

    let saved: Value = http
        .post(server.url("/api/files/save"))
        .json(&json!({ "fileName": file_name, "code": fixtures::RETURN_ZERO }))
        .send()
        .await
        .expect("save")
        .json()
        .await
        .expect("save body");
    assert_eq!(saved, json!({ "status": "ok" }));

    let compiled: Value = http
        .post(server.url("/api/files/compile"))
        .json(&json!({ "fileName": file_name }))
        .send()
        .await
        .expect("compile")
        .json()
        .await
        .expect("compile body");
    assert_eq!(compiled["status"], "ok");
    assert_eq!(compiled["exe"], file_name.trim_end_matches(".c"));

    let mut client = server.socket(&format!("/pty?fileName={file_name}")).await;
    let seen = client.read_until_text("[terminal idle").await;
    assert!(
        texts(&seen).contains(&"\r\n[process exited with code 0]\r\n".to_string()),
        "{seen:?}"
    );
    client.close().await;
}
