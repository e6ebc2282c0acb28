//! Fires randomized events at a running server for smoke testing.

use crate::config::LoadgenConfig;
use futures::stream::{self, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

pub const EVENT_NAMES: [&str; 14] = [
    "click", "view", "purchase", "login", "logout", "signup", "delete", "update", "search",
    "share", "error", "warning", "info", "debug",
];

#[derive(Debug, Clone, Serialize)]
pub struct RandomEvent {
    pub userid: String,
    pub eventname: String,
}

/// A user id of 5-15 alphanumeric characters and one of [`EVENT_NAMES`].
pub fn random_event<R: Rng>(rng: &mut R) -> RandomEvent {
    let len: usize = rng.gen_range(5..=15);
    let userid = (0..len)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect();
    let eventname = EVENT_NAMES[rng.gen_range(0..EVENT_NAMES.len())].to_string();
    RandomEvent { userid, eventname }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub sent: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// POST `config.count` random events to `<url>/process_event`, at most
/// `config.concurrency` in flight.
pub async fn run(config: &LoadgenConfig) -> LoadSummary {
    let url = format!("{}/process_event", config.url.trim_end_matches('/'));
    let events: Vec<RandomEvent> = {
        let mut rng = rand::thread_rng();
        (0..config.count).map(|_| random_event(&mut rng)).collect()
    };

    tracing::info!(
        url = %url,
        count = events.len(),
        concurrency = config.concurrency,
        "sending events"
    );

    let client = reqwest::Client::new();
    let mut responses = stream::iter(events)
        .map(|event| {
            let client = client.clone();
            let url = url.clone();
            async move { client.post(&url).json(&event).send().await }
        })
        .buffer_unordered(config.concurrency.max(1));

    let mut summary = LoadSummary::default();
    while let Some(result) = responses.next().await {
        summary.sent += 1;
        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(status = %resp.status(), "event accepted");
                summary.succeeded += 1;
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "event rejected");
                summary.failed += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        sent = summary.sent,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "load run finished"
    );
    summary
}
