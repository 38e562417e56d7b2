use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};

const SDK_JS: &str = include_str!("../../static/sdk.js");

pub async fn sdk_js() -> Response {
    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/javascript; charset=utf-8"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=300")),
        ],
        SDK_JS,
    )
        .into_response()
}
