#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use disston_core::{ApiError, ApiRequest, ApiResponse, Club, ClubApi, QueryRunner, RetryPolicy, CacheStore, Transport};
use tokio_util::sync::CancellationToken;

/// One scripted answer.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// In-memory transport answering `"<METHOD> <path>"` routes from per-route
/// queues. The last reply of a queue repeats; unknown routes get a 404.
/// Delays honor cancellation the way the HTTP transport does.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, route: &str, replies: impl IntoIterator<Item = Reply>) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(route.to_string(), replies.into_iter().collect());
    }

    pub fn calls(&self, route: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|c| c.as_str() == route)
            .count()
    }

    fn next_reply(&self, route: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().expect("routes lock");
        let queue = routes.get_mut(route)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest, cancel: CancellationToken) -> Result<ApiResponse, ApiError> {
        let route = format!("{} {}", request.method(), request.path());
        self.calls.lock().expect("calls lock").push(route.clone());

        let Some(reply) = self.next_reply(&route) else {
            return Err(ApiError::from_response(404, r#"{"detail":"Not Found"}"#));
        };

        tokio::select! {
            () = cancel.cancelled() => return Err(ApiError::cancelled()),
            () = tokio::time::sleep(reply.delay) => {}
        }

        if (200..300).contains(&reply.status) {
            Ok(ApiResponse::new(reply.status, reply.body))
        } else {
            Err(ApiError::from_response(reply.status, &reply.body))
        }
    }
}

pub fn club(transport: Arc<ScriptedTransport>) -> Club {
    let queries = QueryRunner::new(CacheStore::new(), RetryPolicy::default(), Duration::ZERO);
    Club::with_runners(ClubApi::new(transport), queries)
}

pub fn player_json(id: &str, first_name: &str) -> String {
    format!(
        r#"{{"id":"{}","first_name":"{}","last_name":"Rivera","position":"MF","jersey_number":8,"cards":{{"yellow":1,"red":0}}}}"#,
        id, first_name
    )
}

pub fn players_json(players: &[(&str, &str)]) -> String {
    let items: Vec<String> = players.iter().map(|(id, name)| player_json(id, name)).collect();
    format!("[{}]", items.join(","))
}

pub fn posts_json(ids: &[&str]) -> String {
    let items: Vec<String> = ids
        .iter()
        .map(|id| format!(r#"{{"id":"{}","title":"Post {}","is_published":false}}"#, id, id))
        .collect();
    format!(r#"{{"posts":[{}],"total":{}}}"#, items.join(","), ids.len())
}

/// Let spawned fetches and timers run (time is paused in these tests).
pub async fn let_tasks_run() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
