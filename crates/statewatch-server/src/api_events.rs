//! SSE event stream handler.
//!
//! `GET /v1/event/stream` streams one SSE message per event batch. The SSE
//! `id` is the batch's commit index, so a reconnecting client that sends
//! `Last-Event-ID` resumes right after the last batch it saw.
//!
//! Query parameters:
//! - `topic=Topic:Key` (repeatable; key defaults to `*`; no topics means `*:*`)
//! - `index` first commit index to deliver
//! - `namespace` namespace pattern, `*` by default

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, RawQuery},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
};
use futures_util::Stream;
use statewatch_stream::{Events, StreamError, SubscribeRequest, Topic};
use statewatch_types::WILDCARD;
use std::{convert::Infallible, sync::Arc};

const LAST_EVENT_ID: &str = "last-event-id";

/// Handler for `GET /v1/event/stream`.
pub async fn event_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let last_event_id = headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let request = parse_subscribe_request(query.as_deref().unwrap_or(""), last_event_id)?;

    let subscription = state.broker.subscribe(request).await.map_err(|e| match e {
        StreamError::IndexUnavailable { .. } => ApiError::Conflict(e.to_string()),
        _ => ApiError::Unavailable(e.to_string()),
    })?;

    tracing::debug!(
        subscription_id = subscription.id(),
        cursor = subscription.cursor(),
        "event stream opened"
    );

    let stream = futures_util::stream::unfold(subscription, |mut sub| async move {
        loop {
            match sub.next().await {
                Ok(events) => {
                    if let Some(event) = batch_event(&events) {
                        return Some((Ok(event), sub));
                    }
                }
                Err(StreamError::Lagged { missed }) => {
                    let data = serde_json::json!({ "missed": missed }).to_string();
                    return Some((Ok(Event::default().event("lagged").data(data)), sub));
                }
                Err(e) => {
                    tracing::debug!(subscription_id = sub.id(), reason = %e, "event stream ended");
                    return None;
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn batch_event(events: &Events) -> Option<Event> {
    match serde_json::to_string(events) {
        Ok(data) => Some(Event::default().id(events.index.to_string()).data(data)),
        Err(e) => {
            tracing::error!(index = events.index, "failed to serialize event batch: {}", e);
            None
        }
    }
}

/// Builds a subscribe request from the raw query string.
///
/// A `Last-Event-ID` moves the start index past the batch it names, never
/// backwards.
pub fn parse_subscribe_request(
    query: &str,
    last_event_id: Option<u64>,
) -> Result<SubscribeRequest, ApiError> {
    let mut request = SubscribeRequest::new(0);
    let mut any_topic = false;

    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match name.as_ref() {
            "topic" => {
                let (topic, key) = parse_topic(&value)?;
                request = request.topic(topic, [key]);
                any_topic = true;
            }
            "index" => {
                request.index = value
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid index: {}", value)))?;
            }
            "namespace" if !value.is_empty() => {
                request = request.namespace(value.into_owned());
            }
            _ => {}
        }
    }

    if !any_topic {
        request = request.topic(Topic::All, [WILDCARD]);
    }
    if let Some(last) = last_event_id {
        request.index = request.index.max(last.saturating_add(1));
    }
    Ok(request)
}

fn parse_topic(value: &str) -> Result<(Topic, String), ApiError> {
    let (topic, key) = match value.split_once(':') {
        Some((topic, key)) if !key.is_empty() => (topic, key),
        Some((topic, _)) => (topic, WILDCARD),
        None => (value, WILDCARD),
    };
    let topic = topic
        .parse::<Topic>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok((topic, key.to_string()))
}
