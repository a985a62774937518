use actix_web::HttpResponse;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "miniblog-service",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
