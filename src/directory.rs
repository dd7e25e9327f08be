use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use actix_web::dev::ServerHandle;
use actix_web::{delete, get, put, web, App, HttpResponse, HttpServer, Responder};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::RPC_TIMEOUT_MS;
use crate::error::{ChordError, ChordResult};
use crate::ring::{Id, IdSpace};
use crate::rpc::RemoteNode;

pub const CHORD_TAG: &str = "node.chord";

pub fn chord_node_name(id: Id) -> String {
    format!("node.chord.{id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub uri: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameEntry {
    pub name: String,
    pub uri: String,
}

#[derive(Deserialize)]
struct ListQuery {
    tag: Option<String>,
}

// ---------------------------------------------------------------------------
// Registry server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RegistryState {
    names: RwLock<HashMap<String, Registration>>,
}

// Registering the same name with the same uri is a no-op; a different uri is
// a conflict. This doubles as the compare-and-set for identifier allocation.
#[put("/names/{name}")]
async fn register(
    name: web::Path<String>,
    body: web::Json<Registration>,
    state: web::Data<RegistryState>,
) -> impl Responder {
    let name = name.into_inner();
    let registration = body.into_inner();

    let mut names = state.names.write().await;
    match names.get(&name) {
        Some(existing) if existing.uri == registration.uri => HttpResponse::Ok().finish(),
        Some(_) => HttpResponse::Conflict().body(format!("name '{name}' is taken")),
        None => {
            info!("registered {} => {}", name, registration.uri);
            names.insert(name, registration);
            HttpResponse::Created().finish()
        }
    }
}

#[get("/names/{name}")]
async fn resolve(name: web::Path<String>, state: web::Data<RegistryState>) -> impl Responder {
    let names = state.names.read().await;
    match names.get(name.as_str()) {
        Some(registration) => HttpResponse::Ok().json(registration),
        None => HttpResponse::NotFound().body("name not registered"),
    }
}

#[get("/names")]
async fn list(query: web::Query<ListQuery>, state: web::Data<RegistryState>) -> impl Responder {
    let names = state.names.read().await;
    let entries: Vec<NameEntry> = names
        .iter()
        .filter(|(_, registration)| match &query.tag {
            Some(tag) => registration.tags.iter().any(|t| t == tag),
            None => true,
        })
        .map(|(name, registration)| NameEntry {
            name: name.clone(),
            uri: registration.uri.clone(),
        })
        .collect();
    HttpResponse::Ok().json(entries)
}

#[delete("/names/{name}")]
async fn remove(name: web::Path<String>, state: web::Data<RegistryState>) -> impl Responder {
    let mut names = state.names.write().await;
    match names.remove(name.as_str()) {
        Some(_) => {
            info!("removed {}", name);
            HttpResponse::Ok().finish()
        }
        None => HttpResponse::NotFound().body("name not registered"),
    }
}

/// A running name service. Dropping the struct does not stop the server; use
/// `stop` or let the process exit.
pub struct RunningRegistry {
    pub addr: SocketAddr,
    handle: ServerHandle,
    task: actix_rt::task::JoinHandle<std::io::Result<()>>,
}

impl RunningRegistry {
    /// Host:port the registry actually bound to.
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    /// Block until the server terminates on its own.
    pub async fn wait(self) -> ChordResult<()> {
        self.task
            .await
            .map_err(|e| ChordError::Transport(format!("registry task failed: {e}")))??;
        Ok(())
    }

    pub async fn stop(self) {
        self.handle.stop(true).await;
        let _ = self.task.await;
    }
}

/// Bind and spawn the name service. Port 0 asks the OS for a free port.
pub async fn start_registry(host: &str, port: u16) -> ChordResult<RunningRegistry> {
    let state = web::Data::new(RegistryState::default());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(register)
            .service(resolve)
            .service(list)
            .service(remove)
    })
    .workers(1)
    .bind((host, port))?;

    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    let task = actix_rt::spawn(server);
    info!("name service listening on {}", addr);

    Ok(RunningRegistry { addr, handle, task })
}

// ---------------------------------------------------------------------------
// Directory client
// ---------------------------------------------------------------------------

/// Client side of the name service. Resolution is late on purpose: every
/// lookup hits the registry, so handles never cache liveness.
#[derive(Clone)]
pub struct DirectoryClient {
    base_url: String,
    client: Client,
}

impl DirectoryClient {
    pub fn new(ns_addr: &str, client: Client) -> DirectoryClient {
        DirectoryClient {
            base_url: format!("http://{ns_addr}"),
            client,
        }
    }

    pub fn http_client(&self) -> Client {
        self.client.clone()
    }

    fn timeout() -> Duration {
        Duration::from_millis(RPC_TIMEOUT_MS)
    }

    pub async fn register(&self, name: &str, uri: &str, tags: Vec<String>) -> ChordResult<()> {
        let response = self
            .client
            .put(format!("{}/names/{name}", self.base_url))
            .timeout(Self::timeout())
            .json(&Registration {
                uri: uri.to_string(),
                tags,
            })
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::CONFLICT => Err(ChordError::NameConflict(name.to_string())),
            status => Err(ChordError::bad_status("register", status)),
        }
    }

    pub async fn resolve_uri(&self, name: &str) -> ChordResult<String> {
        let response = self
            .client
            .get(format!("{}/names/{name}", self.base_url))
            .timeout(Self::timeout())
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => {
                let registration: Registration = response.json().await?;
                Ok(registration.uri)
            }
            reqwest::StatusCode::NOT_FOUND => Err(ChordError::UnknownNode(name.to_string())),
            status => Err(ChordError::bad_status("resolve", status)),
        }
    }

    pub async fn list(&self, tag: Option<&str>) -> ChordResult<Vec<NameEntry>> {
        let mut request = self
            .client
            .get(format!("{}/names", self.base_url))
            .timeout(Self::timeout());
        if let Some(tag) = tag {
            request = request.query(&[("tag", tag)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status("list", response.status()));
        }
        Ok(response.json().await?)
    }

    pub async fn remove(&self, name: &str) -> ChordResult<()> {
        let response = self
            .client
            .delete(format!("{}/names/{name}", self.base_url))
            .timeout(Self::timeout())
            .send()
            .await?;
        // A missing name means someone already removed it; that is fine.
        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => Ok(()),
            status => Err(ChordError::bad_status("remove", status)),
        }
    }

    // -- chord-typed helpers ------------------------------------------------

    pub async fn register_chord_node(&self, id: Id, uri: &str) -> ChordResult<()> {
        self.register(&chord_node_name(id), uri, vec![CHORD_TAG.to_string()])
            .await
    }

    pub async fn remove_chord_node(&self, id: Id) -> ChordResult<()> {
        self.remove(&chord_node_name(id)).await
    }

    /// Live chord identifiers, sorted.
    pub async fn chord_ids(&self) -> ChordResult<Vec<Id>> {
        let entries = self.list(Some(CHORD_TAG)).await?;
        let mut ids: Vec<Id> = entries
            .iter()
            .filter_map(|entry| entry.name.rsplit('.').next()?.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub async fn resolve_chord(&self, id: Id) -> ChordResult<RemoteNode> {
        let uri = self.resolve_uri(&chord_node_name(id)).await?;
        Ok(RemoteNode::new(id, uri, self.client.clone()))
    }

    pub async fn random_chord_id(&self) -> ChordResult<Option<Id>> {
        let ids = self.chord_ids().await?;
        let mut rng = rand::thread_rng();
        Ok(ids.choose(&mut rng).copied())
    }

    pub async fn random_chord_node(&self) -> ChordResult<Option<RemoteNode>> {
        match self.random_chord_id().await? {
            Some(id) => Ok(Some(self.resolve_chord(id).await?)),
            None => Ok(None),
        }
    }

    /// A uniformly random identifier not currently registered. Rejection
    /// sampling is fine for the ring sizes this runs at, but a full ring must
    /// fail instead of spinning forever.
    pub async fn free_chord_id(&self, space: &IdSpace) -> ChordResult<Id> {
        let taken: HashSet<Id> = self.chord_ids().await?.into_iter().collect();
        if taken.len() as u64 >= space.size() {
            return Err(ChordError::IdentifiersExhausted(space.size()));
        }
        let mut rng = rand::thread_rng();
        loop {
            let candidate = rng.gen_range(0..space.size());
            if !taken.contains(&candidate) {
                debug!("allocated free chord id {}", candidate);
                return Ok(candidate);
            }
        }
    }
}
