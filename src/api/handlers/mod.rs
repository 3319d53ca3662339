pub mod agents;
pub mod filters;

use actix_web::HttpResponse;
use log::warn;
use serde::Serialize;
use serde_json::json;

use crate::utils::error::AppError;

/// `{success: true, data}` reply
pub fn success<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "data": data,
    }))
}

/// `{success: false, error}` reply with a status code matching the error
pub fn error_response(e: &AppError) -> HttpResponse {
    let mut builder = match e {
        AppError::Validation(_) => HttpResponse::BadRequest(),
        AppError::NotFound(_) => HttpResponse::NotFound(),
        e if e.is_remote() => HttpResponse::BadGateway(),
        _ => {
            warn!("Request failed: {}", e);
            HttpResponse::InternalServerError()
        }
    };
    builder.json(json!({
        "success": false,
        "error": e.operator_message(),
    }))
}
