use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RootMessage {
    pub message: &'static str,
}

/// # GET /
pub async fn root() -> Json<RootMessage> {
    Json(RootMessage {
        message: "Resume Agent API is running successfully",
    })
}
