use std::sync::Arc;

use actix_web::{get, head, post, put, web, HttpRequest, HttpResponse, Responder};
use log::warn;
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::ChordError;
use crate::node::ChordNode;
use crate::rpc::{
    IdMsg, JoinRequest, KeyBatch, NotifyRequest, OptionalIdMsg, PopIntervalRequest,
    UpdateFingerRequest, UpdateFingerResponse, HOP_HEADER,
};

/// Shared state of one node process: the node itself plus the shutdown
/// signal a successful disconnect flips.
pub struct AppCtx {
    pub node: Arc<ChordNode>,
    pub shutdown: watch::Sender<bool>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(contains_storage)
        .service(get_storage)
        .service(put_storage)
        .service(get_id)
        .service(get_successor)
        .service(put_successor)
        .service(get_predecessor)
        .service(put_predecessor)
        .service(find_successor)
        .service(find_predecessor)
        .service(closest_preceding_finger)
        .service(join)
        .service(notify)
        .service(update_finger_table)
        .service(pop_interval)
        .service(pull_keys)
        .service(merge_keys)
        .service(disconnect)
        .service(finger_table)
        .service(stored_keys);
}

fn hop_count(req: &HttpRequest) -> u32 {
    req.headers()
        .get(HOP_HEADER)
        .and_then(|h| h.to_str().ok().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

fn error_response(e: ChordError) -> HttpResponse {
    match e {
        ChordError::NotJoined(_) => HttpResponse::ServiceUnavailable().body(e.to_string()),
        ChordError::HopLimitExceeded(_)
        | ChordError::Transport(_)
        | ChordError::UnknownNode(_) => HttpResponse::BadGateway().body(e.to_string()),
        ChordError::NameConflict(_) => HttpResponse::Conflict().body(e.to_string()),
        _ => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[derive(Deserialize)]
struct KeyLookupQuery {
    id: u64,
}

#[derive(Deserialize)]
struct FingerLookupQuery {
    id: u64,
    skip: Option<String>,
}

// --- public storage API ----------------------------------------------------

#[get("/storage/{key:.*}")]
async fn get_storage(
    req: HttpRequest,
    key: web::Path<String>,
    ctx: web::Data<AppCtx>,
) -> impl Responder {
    let key = key.into_inner();
    match ctx.node.get(&key, hop_count(&req)).await {
        Ok(Some(value)) => HttpResponse::Ok().body(value),
        Ok(None) => HttpResponse::NotFound().body("Key not found"),
        Err(e) => error_response(e),
    }
}

// Presence check with the same routing as a lookup.
#[head("/storage/{key:.*}")]
async fn contains_storage(
    req: HttpRequest,
    key: web::Path<String>,
    ctx: web::Data<AppCtx>,
) -> impl Responder {
    match ctx.node.contains(&key, hop_count(&req)).await {
        Ok(true) => HttpResponse::Ok().finish(),
        Ok(false) => HttpResponse::NotFound().finish(),
        Err(e) => error_response(e),
    }
}

// Takes the key from the path and the value from the request body as a
// UTF-8 string.
#[put("/storage/{key:.*}")]
async fn put_storage(
    req: HttpRequest,
    key: web::Path<String>,
    body: web::Bytes,
    ctx: web::Data<AppCtx>,
) -> impl Responder {
    let key = key.into_inner();
    let value = match std::str::from_utf8(&body) {
        Ok(v) => v.to_string(),
        Err(_) => return HttpResponse::BadRequest().body("Value must be valid UTF-8"),
    };
    match ctx.node.insert(&key, &value, hop_count(&req)).await {
        Ok(()) => HttpResponse::Ok().body("Value stored"),
        Err(e) => error_response(e),
    }
}

// --- internal RPC surface --------------------------------------------------

#[get("/internal/id")]
async fn get_id(ctx: web::Data<AppCtx>) -> impl Responder {
    HttpResponse::Ok().json(IdMsg {
        id: ctx.node.id(),
    })
}

#[get("/internal/successor")]
async fn get_successor(ctx: web::Data<AppCtx>) -> impl Responder {
    HttpResponse::Ok().json(OptionalIdMsg {
        id: ctx.node.successor_id().await,
    })
}

#[put("/internal/successor")]
async fn put_successor(body: web::Json<OptionalIdMsg>, ctx: web::Data<AppCtx>) -> impl Responder {
    ctx.node.set_successor(body.into_inner().id).await;
    HttpResponse::Ok().finish()
}

#[get("/internal/predecessor")]
async fn get_predecessor(ctx: web::Data<AppCtx>) -> impl Responder {
    HttpResponse::Ok().json(OptionalIdMsg {
        id: ctx.node.predecessor_id().await,
    })
}

#[put("/internal/predecessor")]
async fn put_predecessor(body: web::Json<OptionalIdMsg>, ctx: web::Data<AppCtx>) -> impl Responder {
    ctx.node.set_predecessor(body.into_inner().id).await;
    HttpResponse::Ok().finish()
}

#[get("/internal/find-successor")]
async fn find_successor(query: web::Query<KeyLookupQuery>, ctx: web::Data<AppCtx>) -> impl Responder {
    let key = ctx.node.space().reduce(query.id);
    match ctx.node.find_successor(key).await {
        Ok(id) => HttpResponse::Ok().json(IdMsg { id }),
        Err(e) => error_response(e),
    }
}

#[get("/internal/find-predecessor")]
async fn find_predecessor(
    query: web::Query<KeyLookupQuery>,
    ctx: web::Data<AppCtx>,
) -> impl Responder {
    let key = ctx.node.space().reduce(query.id);
    match ctx.node.find_predecessor(key).await {
        Ok(id) => HttpResponse::Ok().json(IdMsg { id }),
        Err(e) => error_response(e),
    }
}

#[get("/internal/closest-preceding-finger")]
async fn closest_preceding_finger(
    query: web::Query<FingerLookupQuery>,
    ctx: web::Data<AppCtx>,
) -> impl Responder {
    let key = ctx.node.space().reduce(query.id);
    let skip: Vec<u64> = query
        .skip
        .as_deref()
        .map(|s| s.split(',').filter_map(|part| part.parse().ok()).collect())
        .unwrap_or_default();
    let id = ctx.node.closest_preceding_finger(key, &skip).await;
    HttpResponse::Ok().json(IdMsg { id })
}

#[post("/internal/join")]
async fn join(body: web::Json<JoinRequest>, ctx: web::Data<AppCtx>) -> impl Responder {
    match ctx.node.join(body.into_inner().anchor).await {
        Ok(()) => HttpResponse::Ok().body("Joined the ring"),
        Err(e) => error_response(e),
    }
}

#[post("/internal/notify")]
async fn notify(body: web::Json<NotifyRequest>, ctx: web::Data<AppCtx>) -> impl Responder {
    let caller = body.into_inner().id;
    let adopted = ctx.node.notify(caller).await;
    if adopted {
        // The new predecessor owns keys we may still hold; tell it to come
        // and claim them, off the request path.
        let node = ctx.node.clone();
        actix_rt::spawn(async move {
            let pulled = match node.remote(caller).await {
                Ok(remote) => remote.pull_keys().await,
                Err(e) => Err(e),
            };
            if let Err(e) = pulled {
                warn!(
                    "node {}: hand-off trigger for new predecessor {} failed: {}",
                    node.id(),
                    caller,
                    e
                );
            }
        });
    }
    HttpResponse::Ok().finish()
}

#[post("/internal/update-finger-table")]
async fn update_finger_table(
    body: web::Json<UpdateFingerRequest>,
    ctx: web::Data<AppCtx>,
) -> impl Responder {
    let request = body.into_inner();
    let fingers = ctx.node.space().bits() as usize;
    if request.index == 0 || request.index > fingers {
        return HttpResponse::BadRequest().body(format!(
            "finger index must be in 1..={fingers}"
        ));
    }
    let node = ctx.node.space().reduce(request.node);
    let (applied, next) = ctx.node.update_finger_table(node, request.index).await;
    HttpResponse::Ok().json(UpdateFingerResponse { applied, next })
}

#[post("/internal/pop-interval")]
async fn pop_interval(
    body: web::Json<PopIntervalRequest>,
    ctx: web::Data<AppCtx>,
) -> impl Responder {
    let request = body.into_inner();
    let entries = ctx.node.pop_in_interval(request.from, request.to).await;
    HttpResponse::Ok().json(KeyBatch { entries })
}

#[post("/internal/pull-keys")]
async fn pull_keys(ctx: web::Data<AppCtx>) -> impl Responder {
    match ctx.node.update_hash_table().await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => error_response(e),
    }
}

#[post("/internal/merge-keys")]
async fn merge_keys(body: web::Json<KeyBatch>, ctx: web::Data<AppCtx>) -> impl Responder {
    ctx.node.merge_keys(body.into_inner().entries).await;
    HttpResponse::Ok().finish()
}

#[post("/internal/disconnect")]
async fn disconnect(ctx: web::Data<AppCtx>) -> impl Responder {
    match ctx.node.disconnect().await {
        Ok(()) => {
            let _ = ctx.shutdown.send(true);
            HttpResponse::Ok().body("Left the ring")
        }
        Err(e) => error_response(e),
    }
}

#[get("/internal/finger-table")]
async fn finger_table(ctx: web::Data<AppCtx>) -> impl Responder {
    HttpResponse::Ok().json(ctx.node.finger_dump().await)
}

#[get("/internal/keys")]
async fn stored_keys(ctx: web::Data<AppCtx>) -> impl Responder {
    HttpResponse::Ok().json(ctx.node.stored_keys().await)
}
