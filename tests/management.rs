// Management API driving reloads through a writable provider.
mod common;

use std::{sync::Arc, time::Duration};

use common::{EventCounter, eventually, get, local_config, spawn_upstream};
use switchyard::{InMemoryProvider, core::{ApiSpec, Server}};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread")]
async fn test_created_api_is_routed_after_reload() {
    let upstream = spawn_upstream("orders").await;
    let events = EventCounter::new();
    let server = Server::builder(local_config(), Arc::new(InMemoryProvider::default()))
        .with_plugin(events.clone())
        .build();
    server.start(CancellationToken::new()).await.unwrap();
    eventually("cold start", || async { events.startups() == 1 }).await;

    let base = format!("http://{}", server.local_addr().unwrap());
    let admin = format!("http://{}", server.management_addr().unwrap());
    assert_eq!(get(&format!("{base}/orders/1")).await.unwrap().0, 404);

    let client = reqwest::Client::new();
    let spec = ApiSpec::new("orders", "/orders", format!("http://{upstream}")).with_strip_path(true);
    let response = client
        .post(format!("{admin}/apis"))
        .json(&spec)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    eventually("orders routed", || async {
        get(&format!("{base}/orders/1")).await == Some((200, "orders:/1".to_string()))
    })
    .await;
    assert_eq!(events.reloads(), 1);

    let status: serde_json::Value = client
        .get(format!("{admin}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["provider"], "memory");
    assert_eq!(status["routes"], serde_json::json!(["orders"]));

    let response = client
        .delete(format!("{admin}/apis/orders"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    eventually("orders removed", || async {
        get(&format!("{base}/orders/1")).await.map(|(s, _)| s) == Some(404)
    })
    .await;

    server.stop(Duration::from_secs(1)).await;
}
