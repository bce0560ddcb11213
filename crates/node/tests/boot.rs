//! Full node boot: every module starts in dependency order, the command
//! surface works end to end, and shutdown drains cleanly.

use std::time::Duration;

use serde_json::json;
use strato_engine::Lifecycle;
use strato_node::config::Config;
use strato_node::Node;
use strato_primitives::{CallerContext, Role};
use strato_provider::Page;

fn admin() -> CallerContext {
    CallerContext::new("tenant-1", "ops", Role::Admin)
}

fn user() -> CallerContext {
    CallerContext::new("tenant-1", "dev", Role::User)
}

#[tokio::test]
async fn boot_execute_and_stop() {
    let node = Node::build(Config::default()).await.unwrap();
    let launched = node.launch().await.unwrap();
    let node = launched.node();

    // Every module reports ready through the status surface.
    let status = node.status().await;
    assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    assert!(status.engine.modules.iter().all(|m| m.lifecycle == Lifecycle::Ready));
    assert!(status.engine.modules.iter().any(|m| m.name == "storage"));
    assert!(status.engine.modules.iter().any(|m| m.name == "automation"));

    // Account + secret + function + execution through the real wiring.
    let account = node.accounts().create(&admin(), "owner@example.com", json!({})).await.unwrap();
    node.secrets().put(&user(), &account.id, "api-key", "hunter2").await.unwrap();

    let function = node
        .functions()
        .create(&user(), &account.id, "echo", "export default run", vec!["api-key".into()])
        .await
        .unwrap();

    let execution =
        node.functions().execute(&user(), &function.id, json!({"ping": true})).await.unwrap();
    assert_eq!(execution.input, json!({"ping": true}));

    // Randomness is deterministic per (account, request, length).
    let first = node.randomness().generate(&user(), &account.id, "req", 32).unwrap();
    let second = node.randomness().generate(&user(), &account.id, "req", 32).unwrap();
    assert_eq!(first, second);

    launched.stop().await.unwrap();
}

#[tokio::test]
async fn account_deletion_cascades_over_the_bus() {
    let node = Node::build(Config::default()).await.unwrap();
    let launched = node.launch().await.unwrap();
    let node = launched.node();

    let account = node.accounts().create(&admin(), "owner", json!({})).await.unwrap();
    node.functions().create(&user(), &account.id, "fn", "src", vec![]).await.unwrap();

    node.accounts().delete(&admin(), &account.id).await.unwrap();

    // The functions service consumes the event and deletes its rows.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let remaining = node.functions().list(&user(), &account.id, Page::default()).await.unwrap();
    assert!(remaining.is_empty());

    launched.stop().await.unwrap();
}

#[tokio::test]
async fn persistent_backend_without_a_secret_key_fails_startup() {
    let config: Config = toml::from_str(
        r#"
        [storage]
        backend = "sqlite"
        path = "/tmp/strato-test-never-created.db"
        "#,
    )
    .unwrap();

    let err = Node::build(config).await.unwrap_err();
    assert!(err.to_string().contains("secrets.key"));
}
