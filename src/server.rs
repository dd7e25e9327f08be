use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use log::{info, warn};
use tokio::sync::watch;

use crate::api::{self, AppCtx};
use crate::config::{DEFAULT_BITS, DEFAULT_NODE_HOST, DEFAULT_NS_HOST, DEFAULT_NS_PORT};
use crate::directory::DirectoryClient;
use crate::error::{ChordError, ChordResult};
use crate::node::{ChordNode, NodeConfig};
use crate::ring::{Id, IdSpace};
use crate::rpc::http_client;
use crate::workers;

#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub bits: u32,
    /// Requested identifier (taken mod N); `None` picks a free one.
    pub id: Option<u64>,
    /// Node to join through; `None` picks a random live chord node, which
    /// for the first node means starting a fresh ring.
    pub anchor: Option<u64>,
    pub node: NodeConfig,
    /// Name-service address as host:port.
    pub ns_addr: String,
    /// Host the node's own HTTP server binds to; the port is picked by the OS.
    pub host: String,
}

impl Default for NodeOptions {
    fn default() -> Self {
        NodeOptions {
            bits: DEFAULT_BITS,
            id: None,
            anchor: None,
            node: NodeConfig::default(),
            ns_addr: format!("{DEFAULT_NS_HOST}:{DEFAULT_NS_PORT}"),
            host: DEFAULT_NODE_HOST.to_string(),
        }
    }
}

/// A chord node process: HTTP server, directory registration, and (with
/// stabilization) the two periodic workers.
pub struct RunningNode {
    pub id: Id,
    pub addr: SocketAddr,
    pub base_url: String,
    handle: ServerHandle,
    task: actix_rt::task::JoinHandle<std::io::Result<()>>,
    shutdown: watch::Sender<bool>,
}

impl RunningNode {
    /// Block until the server terminates (normally after a disconnect).
    pub async fn wait(self) -> ChordResult<()> {
        self.task
            .await
            .map_err(|e| ChordError::Transport(format!("node server task failed: {e}")))??;
        Ok(())
    }

    /// Tear the process down without running the departure protocol: no key
    /// hand-off, no neighbor rewiring. The registration is still released.
    pub async fn kill(self) {
        let _ = self.shutdown.send(true);
        self.handle.stop(true).await;
        let _ = self.task.await;
    }
}

pub async fn start_node(options: NodeOptions) -> ChordResult<RunningNode> {
    let space = IdSpace::new(options.bits);
    let client = http_client()?;
    let directory = DirectoryClient::new(&options.ns_addr, client);

    let id = match options.id {
        Some(id) => space.reduce(id),
        None => directory.free_chord_id(&space).await?,
    };
    let anchor = match options.anchor {
        Some(anchor) => Some(space.reduce(anchor)),
        None => directory.random_chord_id().await?,
    };

    let node = Arc::new(ChordNode::new(id, space, options.node.clone(), directory.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = web::Data::new(AppCtx {
        node: node.clone(),
        shutdown: shutdown_tx.clone(),
    });

    let server = HttpServer::new(move || App::new().app_data(ctx.clone()).configure(api::configure))
        .workers(2)
        .bind((options.host.as_str(), 0))?;
    let addr = server.addrs()[0];
    let base_url = format!("http://{addr}");

    let server = server.run();
    let handle = server.handle();
    let task = actix_rt::spawn(server);

    // Registration is the compare-and-set on the identifier: losing the race
    // is fatal here, the caller can retry with a fresh id.
    if let Err(e) = directory.register_chord_node(id, &base_url).await {
        handle.stop(true).await;
        let _ = task.await;
        return Err(e);
    }
    info!("node {} serving on {}", id, base_url);

    if let Err(e) = node.join(anchor).await {
        let _ = directory.remove_chord_node(id).await;
        handle.stop(true).await;
        let _ = task.await;
        return Err(e);
    }

    let mut worker_handles = Vec::new();
    if options.node.use_stabilization {
        worker_handles.push(workers::spawn_stabilize(node.clone(), shutdown_rx.clone()));
        worker_handles.push(workers::spawn_fix_fingers(node.clone(), shutdown_rx.clone()));
    }

    // Supervisor: when the shutdown signal flips (disconnect endpoint, or
    // kill), stop the workers first, then release the registration, then
    // stop serving.
    {
        let mut shutdown_rx = shutdown_rx;
        let directory = directory.clone();
        let handle = handle.clone();
        actix_rt::spawn(async move {
            if shutdown_rx.changed().await.is_err() {
                return;
            }
            for worker in worker_handles {
                let _ = worker.await;
            }
            if let Err(e) = directory.remove_chord_node(id).await {
                warn!("node {}: failed to deregister: {}", id, e);
            }
            handle.stop(true).await;
            info!("node {} shut down", id);
        });
    }

    Ok(RunningNode {
        id,
        addr,
        base_url,
        handle,
        task,
        shutdown: shutdown_tx,
    })
}
