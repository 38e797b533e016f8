// CORS and request timing middleware

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Header carrying the handler time of every response
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// Create CORS middleware layer
///
/// Allows all origins, methods, and headers so a browser front-end on
/// another port can call the API. Handles OPTIONS preflight requests.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Stamp `X-Response-Time: <n>ms` on the response and log one line per request.
///
/// For event streams the time covers the handler only, not the stream body.
pub async fn timing_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let mut response = next.run(request).await;

    let elapsed_ms = start.elapsed().as_millis();
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed_ms)) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }

    tracing::info!(
        status = response.status().as_u16(),
        "{} {} - {}ms",
        method,
        uri,
        elapsed_ms
    );

    response
}
