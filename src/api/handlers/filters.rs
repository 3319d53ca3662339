use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;

use crate::api::handlers::{error_response, success};
use crate::filter::compiler;
use crate::filter::presets::FilterPresetStore;
use crate::models::filter::FilterSpec;
use crate::models::preset::PresetScope;

/// Selects the preset scope; no agent means the global presets
#[derive(Deserialize)]
pub struct ScopeQuery {
    pub agent: Option<String>,
}

/// Save preset request
#[derive(Deserialize)]
pub struct SavePresetRequest {
    pub agent: Option<String>,
    pub name: String,
    pub spec: FilterSpec,
}

/// Compile a filter to the BPF string an agent would receive
pub async fn compile_filter(spec: web::Json<FilterSpec>) -> impl Responder {
    let filter = compiler::resolve(&spec);
    success(json!({
        "filter": filter,
        "summary": spec.summary(),
    }))
}

pub async fn list_presets(
    store: web::Data<FilterPresetStore>,
    query: web::Query<ScopeQuery>,
) -> impl Responder {
    let scope = PresetScope::for_agent(query.agent.as_deref());
    match store.list(&scope) {
        Ok(presets) => success(presets),
        Err(e) => error_response(&e),
    }
}

pub async fn get_preset(
    store: web::Data<FilterPresetStore>,
    path: web::Path<String>,
    query: web::Query<ScopeQuery>,
) -> impl Responder {
    let scope = PresetScope::for_agent(query.agent.as_deref());
    match store.get(&scope, &path) {
        Ok(preset) => success(preset),
        Err(e) => error_response(&e),
    }
}

pub async fn save_preset(
    store: web::Data<FilterPresetStore>,
    request: web::Json<SavePresetRequest>,
) -> impl Responder {
    let request = request.into_inner();
    let scope = PresetScope::for_agent(request.agent.as_deref());
    match store.save(&scope, &request.name, request.spec) {
        Ok(id) => HttpResponse::Created().json(json!({
            "success": true,
            "data": { "id": id }
        })),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_preset(
    store: web::Data<FilterPresetStore>,
    path: web::Path<String>,
    query: web::Query<ScopeQuery>,
) -> impl Responder {
    let scope = PresetScope::for_agent(query.agent.as_deref());
    match store.delete(&scope, &path) {
        Ok(()) => success(json!({ "id": path.into_inner() })),
        Err(e) => error_response(&e),
    }
}
