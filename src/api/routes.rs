use actix_web::{error, web, HttpResponse, Responder};
use serde_json::json;

use crate::api::handlers::{
    agents::{
        apply_filter,
        get_agent,
        list_agents,
        refresh_agents,
        set_interface,
        start_capture,
        stop_capture,
        watch_agent,
    },
    filters::{
        compile_filter,
        delete_preset,
        get_preset,
        list_presets,
        save_preset,
    },
};
use crate::api::websocket::ws_index;

/// Root endpoint to provide information about the API
async fn index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "RustShark Fleet API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Controller for remote RustShark capture agents",
        "endpoints": [
            {
                "path": "/api/agents",
                "method": "GET",
                "description": "List known capture agents"
            },
            {
                "path": "/api/agents/refresh",
                "method": "POST",
                "description": "Reload agents from the directory server"
            },
            {
                "path": "/api/agents/{id}",
                "method": "GET",
                "description": "Get the state of one agent"
            },
            {
                "path": "/api/agents/{id}/interface",
                "method": "POST",
                "description": "Select the capture interface"
            },
            {
                "path": "/api/agents/{id}/capture/start",
                "method": "POST",
                "description": "Start capture on an agent"
            },
            {
                "path": "/api/agents/{id}/capture/stop",
                "method": "POST",
                "description": "Stop capture on an agent"
            },
            {
                "path": "/api/agents/{id}/filter",
                "method": "POST",
                "description": "Change the active filter, restarting a running capture"
            },
            {
                "path": "/api/agents/{id}/watch",
                "method": "POST",
                "description": "Switch between roster and focused polling"
            },
            {
                "path": "/api/filters/compile",
                "method": "POST",
                "description": "Compile a filter to BPF"
            },
            {
                "path": "/api/filters/presets",
                "method": "GET",
                "description": "List saved filter presets"
            },
            {
                "path": "/api/filters/presets",
                "method": "POST",
                "description": "Save a filter preset"
            },
            {
                "path": "/api/filters/presets/{id}",
                "method": "GET",
                "description": "Get one filter preset"
            },
            {
                "path": "/api/filters/presets/{id}",
                "method": "DELETE",
                "description": "Delete a filter preset"
            },
            {
                "path": "/api/ws",
                "method": "GET",
                "description": "WebSocket endpoint for agent state updates"
            }
        ]
    }))
}

/// Malformed request bodies get the same envelope as every other failure
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": err.to_string(),
        }));
        error::InternalError::from_response(err, response).into()
    })
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint
        .route("/", web::get().to(index))
        .service(
            web::scope("/api")
                .app_data(json_config())
                // WebSocket route for agent updates
                .route("/ws", web::get().to(ws_index))

                // Agent management
                .service(
                    web::scope("/agents")
                        .route("", web::get().to(list_agents))
                        .route("/refresh", web::post().to(refresh_agents))
                        .route("/{id}", web::get().to(get_agent))
                        .route("/{id}/interface", web::post().to(set_interface))
                        .route("/{id}/capture/start", web::post().to(start_capture))
                        .route("/{id}/capture/stop", web::post().to(stop_capture))
                        .route("/{id}/filter", web::post().to(apply_filter))
                        .route("/{id}/watch", web::post().to(watch_agent))
                )
                // Filters and presets
                .service(
                    web::scope("/filters")
                        .route("/compile", web::post().to(compile_filter))
                        .route("/presets", web::get().to(list_presets))
                        .route("/presets", web::post().to(save_preset))
                        .route("/presets/{id}", web::get().to(get_preset))
                        .route("/presets/{id}", web::delete().to(delete_preset))
                )
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::Value;

    #[actix_rt::test]
    async fn index_lists_endpoints() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get().uri("/").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "RustShark Fleet API");
        assert!(body["endpoints"].as_array().unwrap().len() > 10);
    }
}
