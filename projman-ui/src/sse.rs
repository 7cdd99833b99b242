//! Server-Sent Events stream of project activity.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::{AppState, UiEvent};

/// Build the SSE frame for `event`: the event name is its kind, the data its
/// JSON form.
fn to_sse(event: &UiEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.kind()).data(json)),
        Err(err) => {
            warn!(err = %err, kind = event.kind(), "failed to serialize event");
            None
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(frame) = to_sse(&event) {
                        yield Ok(frame);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                    // Clients re-fetch the listing after a gap.
                    if let Some(frame) = to_sse(&UiEvent::ProjectsChanged) {
                        yield Ok(frame);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use projman::io::process::OutputStream;
    use std::path::PathBuf;

    use projman::io::settings::Settings;

    #[test]
    fn emitted_events_reach_subscribers_in_order() {
        let state = AppState::new(PathBuf::from("settings.toml"), Settings::default());
        let mut rx = state.event_tx.subscribe();

        state.emit(UiEvent::Output {
            project: "demo".to_string(),
            stream: OutputStream::Stderr,
            line: "boom".to_string(),
        });
        state.emit(UiEvent::Exited {
            project: "demo".to_string(),
            code: Some(1),
        });

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["output", "exited"]);
    }

    #[test]
    fn output_event_json_names_stream() {
        let event = UiEvent::Output {
            project: "demo".to_string(),
            stream: OutputStream::Stdout,
            line: "hi".to_string(),
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["type"], "output");
        assert_eq!(json["stream"], "stdout");
        assert!(to_sse(&event).is_some());
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let state = AppState::new(PathBuf::from("settings.toml"), Settings::default());
        state.emit(UiEvent::ProjectsChanged);
    }
}
