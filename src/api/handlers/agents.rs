use actix_web::{web, HttpResponse, Responder};
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::agent::poller::PollCadence;
use crate::agent::registry::AgentRegistry;
use crate::api::handlers::{error_response, success};
use crate::models::filter::FilterSpec;

/// Request for selecting an interface
#[derive(Deserialize)]
pub struct SetInterfaceRequest {
    pub interface: String,
}

/// Request for starting capture. Missing fields fall back to the agent's
/// selected interface and active filter.
#[derive(Deserialize, Default)]
pub struct StartCaptureRequest {
    pub interface: Option<String>,
    pub filter: Option<FilterSpec>,
}

/// Request for changing the active filter
#[derive(Deserialize)]
pub struct ApplyFilterRequest {
    pub filter: FilterSpec,
}

#[derive(Deserialize)]
pub struct WatchRequest {
    pub cadence: PollCadence,
}

/// List all known agents
pub async fn list_agents(registry: web::Data<Arc<AgentRegistry>>) -> impl Responder {
    success(registry.snapshots())
}

/// Reload the roster from the directory server
pub async fn refresh_agents(registry: web::Data<Arc<AgentRegistry>>) -> impl Responder {
    match registry.refresh().await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "success": true,
            "data": {
                "summary": summary,
                "agents": registry.snapshots(),
            }
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn get_agent(
    registry: web::Data<Arc<AgentRegistry>>,
    path: web::Path<String>,
) -> impl Responder {
    match registry.get(&path) {
        Ok(coordinator) => success(coordinator.snapshot()),
        Err(e) => error_response(&e),
    }
}

pub async fn set_interface(
    registry: web::Data<Arc<AgentRegistry>>,
    path: web::Path<String>,
    request: web::Json<SetInterfaceRequest>,
) -> impl Responder {
    let coordinator = match registry.get(&path) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    match coordinator.set_interface(&request.interface).await {
        Ok(snapshot) => success(snapshot),
        Err(e) => error_response(&e),
    }
}

pub async fn start_capture(
    registry: web::Data<Arc<AgentRegistry>>,
    path: web::Path<String>,
    request: Option<web::Json<StartCaptureRequest>>,
) -> impl Responder {
    let coordinator = match registry.get(&path) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    let request = request.map(web::Json::into_inner).unwrap_or_default();
    let agent = coordinator.agent();

    let interface = request.interface.or(agent.interface).unwrap_or_default();
    let filter = request.filter.or(agent.active_filter);
    info!(
        "Start capture requested for agent {} on '{}' with filter {:?}",
        agent.id,
        interface,
        filter.as_ref().map(FilterSpec::summary)
    );

    match coordinator.start_capture(&interface, filter).await {
        Ok(snapshot) => success(snapshot),
        Err(e) => error_response(&e),
    }
}

pub async fn stop_capture(
    registry: web::Data<Arc<AgentRegistry>>,
    path: web::Path<String>,
) -> impl Responder {
    let coordinator = match registry.get(&path) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    match coordinator.stop_capture().await {
        Ok(snapshot) => success(snapshot),
        Err(e) => error_response(&e),
    }
}

pub async fn apply_filter(
    registry: web::Data<Arc<AgentRegistry>>,
    path: web::Path<String>,
    request: web::Json<ApplyFilterRequest>,
) -> impl Responder {
    let coordinator = match registry.get(&path) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    match coordinator.apply_filter(request.into_inner().filter).await {
        Ok(snapshot) => success(snapshot),
        Err(e) => error_response(&e),
    }
}

/// Switch an agent between roster and focused polling
pub async fn watch_agent(
    registry: web::Data<Arc<AgentRegistry>>,
    path: web::Path<String>,
    request: web::Json<WatchRequest>,
) -> impl Responder {
    let id = path.into_inner();
    match registry.set_cadence(&id, request.cadence) {
        Ok(()) => success(json!({ "id": id, "cadence": registry.cadence(&id) })),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::coordinator::tests::{Call, Failure, FakeAgent};
    use crate::agent::registry::RegistrySettings;
    use crate::api::routes;
    use crate::models::agent::DirectoryAgent;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::Value;

    fn registry(fake: Arc<FakeAgent>) -> Arc<AgentRegistry> {
        let registry = AgentRegistry::new(fake, None, RegistrySettings::default());
        registry.add_static(&DirectoryAgent {
            id: Some("a1".into()),
            name: "lab".into(),
            url: "http://10.0.0.7:8090".into(),
            ..Default::default()
        });
        Arc::new(registry)
    }

    macro_rules! app {
        ($registry:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($registry.clone()))
                    .configure(routes::configure),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn start_sends_compiled_filter() {
        let fake = Arc::new(FakeAgent::default());
        let registry = registry(fake.clone());
        let app = app!(registry);

        let req = test::TestRequest::post()
            .uri("/api/agents/a1/capture/start")
            .set_json(json!({
                "interface": "eth0",
                "filter": [
                    {"kind": "port", "sub_kind": "dst", "value": "443", "operator": "equals"}
                ]
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "capturing");
        assert_eq!(body["data"]["active_filter_bpf"], "dst port 443");
        assert!(fake.commands().contains(&Call::Start(crate::agent::client::StartCaptureRequest {
            interface: "eth0".into(),
            filter: Some("dst port 443".into()),
        })));
    }

    #[actix_rt::test]
    async fn agent_failure_is_bad_gateway_with_message() {
        let fake = Arc::new(FakeAgent::default());
        *fake.fail_start.lock() = Some(Failure::Transport);
        let registry = registry(fake);
        let app = app!(registry);

        let req = test::TestRequest::post()
            .uri("/api/agents/a1/capture/start")
            .set_json(json!({"interface": "eth0"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Connection to agent failed");
    }

    #[actix_rt::test]
    async fn empty_interface_is_rejected_without_calling_agent() {
        let fake = Arc::new(FakeAgent::default());
        let registry = registry(fake.clone());
        let app = app!(registry);

        let req = test::TestRequest::post()
            .uri("/api/agents/a1/interface")
            .set_json(json!({"interface": "  "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(fake.commands().is_empty());
    }

    #[actix_rt::test]
    async fn unknown_agent_is_not_found() {
        let registry = registry(Arc::new(FakeAgent::default()));
        let app = app!(registry);

        let req = test::TestRequest::get().uri("/api/agents/nope").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn watch_switches_cadence() {
        let registry = registry(Arc::new(FakeAgent::default()));
        let app = app!(registry);

        let req = test::TestRequest::post()
            .uri("/api/agents/a1/watch")
            .set_json(json!({"cadence": "focused"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["cadence"], "focused");
        assert_eq!(registry.cadence("a1"), Some(PollCadence::Focused));
    }

    #[actix_rt::test]
    async fn list_returns_snapshots() {
        let registry = registry(Arc::new(FakeAgent::default()));
        let app = app!(registry);

        let req = test::TestRequest::get().uri("/api/agents").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"][0]["id"], "a1");
        assert_eq!(body["data"][0]["name"], "lab");
    }
}
