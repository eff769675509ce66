use crate::dashboard_events::DashboardEvent;
use crate::state::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

pub async fn dashboard_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.dashboard_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        // Lagged: the client should refetch.
        let event = result.unwrap_or(DashboardEvent::Resync);
        match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
