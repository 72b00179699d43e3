//! Server-Sent Events stream of poll changes.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::{
        Sse,
        sse::{Event, KeepAlive},
    },
};
use futures::Stream;
use tracing::{debug, warn};

use crate::state::AppState;

/// `GET /events`
///
/// Each [`PollEvent`](crate::events::PollEvent) is sent as a named SSE event
/// with its JSON payload. Idle connections get a `heartbeat` event.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.events().subscribe();
    debug!(connections = state.events().connection_count(), "SSE client connected");

    let events = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            match Event::default().event(event.name()).json_data(&*event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(err) => warn!(event = event.name(), error = %err, "Failed to encode event"),
            }
        }
    };

    let keep_alive = KeepAlive::new()
        .interval(state.config().heartbeat_interval)
        .event(Event::default().event("heartbeat").data("{}"));

    Sse::new(events).keep_alive(keep_alive)
}
