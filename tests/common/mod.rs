#![allow(dead_code)]

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::http::Uri;
use switchyard::{
    config::{GlobalConfig, WebConfig},
    core::{ReloadEvent, StartupEvent},
    ports::LifecyclePlugin,
};

/// Loopback config with every port picked by the OS.
pub fn local_config() -> GlobalConfig {
    GlobalConfig::builder()
        .host("127.0.0.1")
        .port(0)
        .grace_timeout(Duration::from_millis(100))
        .hard_shutdown_deadline(Duration::from_secs(5))
        .web(WebConfig {
            port: 0,
            ..WebConfig::default()
        })
        .build()
}

/// Start an upstream that answers `<name>:<path>`. Paths ending in `/slow`
/// answer after 300ms.
pub async fn spawn_upstream(name: &'static str) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().fallback(move |uri: Uri| async move {
        if uri.path().ends_with("/slow") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        format!("{name}:{}", uri.path())
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// GET `url`, returning status and body, or `None` when the connection fails.
pub async fn get(url: &str) -> Option<(u16, String)> {
    let response = reqwest::get(url).await.ok()?;
    let status = response.status().as_u16();
    let body = response.text().await.ok()?;
    Some((status, body))
}

/// Poll `check` every 25ms for up to 5s.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[derive(Default)]
pub struct EventCounter {
    pub startups: AtomicUsize,
    pub reloads: AtomicUsize,
}

impl EventCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn startups(&self) -> usize {
        self.startups.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LifecyclePlugin for EventCounter {
    fn name(&self) -> &str {
        "event-counter"
    }

    async fn on_startup(&self, _event: &StartupEvent) -> eyre::Result<()> {
        self.startups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_reload(&self, _event: &ReloadEvent) -> eyre::Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
