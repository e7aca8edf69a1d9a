use actix_web::{HttpResponse, Responder, get, web::Data};

use crate::trigger::SyncTrigger;

/// Current counters of the trigger rate limiter.
#[get("/rate-limit-stats")]
pub async fn rate_limit_stats(service: Data<dyn SyncTrigger>) -> impl Responder {
    HttpResponse::Ok().json(service.rate_limit_stats())
}
