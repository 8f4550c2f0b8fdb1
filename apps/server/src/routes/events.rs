use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::web::Bytes;
use actix_web::{HttpResponse, get, web};
use futures::{StreamExt, future, stream};
use regionwatch::HubEvent;
use serde::Serialize;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

macros_utils::routes! {
    route events,
}

/// Encode one server-sent event frame
fn sse_frame<T: Serialize + ?Sized>(event: &str, data: &T) -> Result<Bytes, serde_json::Error> {
    let data = serde_json::to_string(data)?;
    Ok(Bytes::from(format!("event: {event}\ndata: {data}\n\n")))
}

/// Live channel: one `health-summary` on connect, then a `status-update` per cycle
#[get("/api/events")]
pub async fn events(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let subscription = state.coordinator.hub().subscribe(state.now()).await?;
    let greeting = sse_frame("health-summary", &subscription.greeting)?;
    debug!(subscribers = state.coordinator.hub().subscriber_count(), "Event subscriber connected");

    let updates = stream::unfold(subscription, |mut subscription| async move {
        let frame = match subscription.next_event().await? {
            HubEvent::StatusUpdate(results) => sse_frame("status-update", results.as_slice()),
        };
        Some((frame, subscription))
    });

    let body = stream::once(future::ready(Ok(greeting))).chain(updates);

    Ok(HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .streaming(body))
}
