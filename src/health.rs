use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let connection = state.provider.connection();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "connection": {
            "state": state.provider.connection_state(),
            "session_id": connection.as_ref().map(|s| s.id()),
            "ready_state": connection.as_ref().map(|s| s.ready_state())
        },
        "credential": {
            "endpoint": config.credential_url(),
            "minting": config.deepgram.project_id().is_some()
        }
    }))
}
