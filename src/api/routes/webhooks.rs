//! Provider webhook endpoint.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::api::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new().route("/webhooks", post(receive))
}

/// POST /webhooks - The status code is the acknowledgement: 2xx stops
/// provider retries, 5xx asks for redelivery.
async fn receive(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let span = info_span!("webhook", request_id = %Uuid::new_v4());
    state.receiver.handle(&body, &headers).instrument(span).await
}
