use async_trait::async_trait;
use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::RwLock;

use crate::config::{
    DEFAULT_CACHE_SIZE, FIX_FINGERS_INTERVAL_MS, HOP_LIMIT, STABILIZE_INTERVAL_MS,
};
use crate::directory::DirectoryClient;
use crate::error::{ChordError, ChordResult};
use crate::finger::{FingerEntry, FingerTable};
use crate::ring::{Id, IdSpace};
use crate::rpc::{RemoteNode, RingView};
use crate::store::KeyStore;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub cache_size: usize,
    pub use_stabilization: bool,
    pub stabilize_interval_ms: u64,
    pub fix_fingers_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            cache_size: DEFAULT_CACHE_SIZE,
            use_stabilization: true,
            stabilize_interval_ms: STABILIZE_INTERVAL_MS,
            fix_fingers_interval_ms: FIX_FINGERS_INTERVAL_MS,
        }
    }
}

/// One ring member. All mutable state sits behind its own lock and is only
/// touched by this process; remote peers get at it through the RPC surface.
/// No lock is ever held across a network call.
pub struct ChordNode {
    id: Id,
    space: IdSpace,
    config: NodeConfig,
    finger_table: RwLock<FingerTable>,
    store: RwLock<KeyStore>,
    directory: DirectoryClient,
}

impl ChordNode {
    pub fn new(id: Id, space: IdSpace, config: NodeConfig, directory: DirectoryClient) -> ChordNode {
        let finger_table = FingerTable::new(id, &space);
        let store = KeyStore::new(config.cache_size);
        ChordNode {
            id,
            space,
            config,
            finger_table: RwLock::new(finger_table),
            store: RwLock::new(store),
            directory,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn space(&self) -> IdSpace {
        self.space
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub async fn remote(&self, id: Id) -> ChordResult<RemoteNode> {
        self.directory.resolve_chord(id).await
    }

    // -- link accessors -----------------------------------------------------

    pub async fn successor_id(&self) -> Option<Id> {
        self.finger_table.read().await.successor()
    }

    pub async fn predecessor_id(&self) -> Option<Id> {
        self.finger_table.read().await.predecessor()
    }

    pub async fn set_successor(&self, id: Option<Id>) {
        self.finger_table.write().await.set_successor(id);
    }

    pub async fn set_predecessor(&self, id: Option<Id>) {
        self.finger_table.write().await.set_predecessor(id);
    }

    pub async fn finger_dump(&self) -> Vec<FingerEntry> {
        self.finger_table.read().await.dump()
    }

    pub async fn stored_keys(&self) -> Vec<String> {
        self.store.read().await.keys()
    }

    // -- lookups ------------------------------------------------------------

    /// Highest finger strictly between this node and `key`, ignoring anything
    /// in `skip` (nodes the caller has already found unreachable).
    pub async fn closest_preceding_finger(&self, key: Id, skip: &[Id]) -> Id {
        let ft = self.finger_table.read().await;
        for slot in (1..=ft.fingers()).rev() {
            if let Some(node) = ft.entry(slot).node() {
                if skip.contains(&node) {
                    continue;
                }
                if self.space.in_between(node, self.space.add(self.id, 1), key, false) {
                    return node;
                }
            }
        }
        self.id
    }

    pub async fn find_predecessor(&self, key: Id) -> ChordResult<Id> {
        Ok(self.predecessor_walk(key).await?.0)
    }

    pub async fn find_successor(&self, key: Id) -> ChordResult<Id> {
        Ok(self.predecessor_walk(key).await?.1)
    }

    /// Walk the ring toward `key` and return `(predecessor, its successor)`.
    /// The walk starts on the local view and pays RPCs only once it leaves
    /// this node. A hop that turns out dead is skipped on the retry rather
    /// than failing the lookup, so stale fingers left by a departed node do
    /// not poison routing.
    async fn predecessor_walk(&self, key: Id) -> ChordResult<(Id, Id)> {
        let mut current: Box<dyn RingView + '_> = Box::new(LocalView(self));
        let mut current_successor = current
            .view_successor_id()
            .await?
            .ok_or(ChordError::NotJoined(self.id))?;
        let mut dead: Vec<Id> = Vec::new();

        for _ in 0..HOP_LIMIT {
            if self.space.in_between(
                key,
                self.space.add(current.ring_id(), 1),
                self.space.add(current_successor, 1),
                true,
            ) {
                return Ok((current.ring_id(), current_successor));
            }

            let next = current.view_closest_preceding_finger(key, &dead).await?;
            if next == current.ring_id() {
                // Nothing closer known; stop here rather than spin.
                return Ok((current.ring_id(), current_successor));
            }

            let candidate: Box<dyn RingView + '_> = if next == self.id {
                Box::new(LocalView(self))
            } else {
                match self.remote(next).await {
                    Ok(remote) => Box::new(remote),
                    Err(ChordError::UnknownNode(_)) | Err(ChordError::Transport(_)) => {
                        warn!("node {}: hop {} is unreachable, routing around it", self.id, next);
                        dead.push(next);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };

            match candidate.view_successor_id().await {
                Ok(Some(successor)) => {
                    current = candidate;
                    current_successor = successor;
                }
                Ok(None) => {
                    // Mid-join node; not usable as a hop yet.
                    dead.push(next);
                }
                Err(ChordError::UnknownNode(_)) | Err(ChordError::Transport(_)) => {
                    warn!("node {}: hop {} is unreachable, routing around it", self.id, next);
                    dead.push(next);
                }
                Err(e) => return Err(e),
            }
        }
        Err(ChordError::HopLimitExceeded(HOP_LIMIT))
    }

    // -- key operations -----------------------------------------------------

    pub async fn insert(&self, key: &str, value: &str, hops: u32) -> ChordResult<()> {
        let hashed = self.space.hash_key(key);
        let owner = self.find_successor(hashed).await?;
        if owner == self.id {
            debug!("node {}: storing '{}' (hash {})", self.id, key, hashed);
            self.store
                .write()
                .await
                .put(key.to_string(), value.to_string());
            Ok(())
        } else {
            self.forward_guard(hops)?;
            self.remote(owner).await?.insert(key, value, hops + 1).await
        }
    }

    pub async fn get(&self, key: &str, hops: u32) -> ChordResult<Option<String>> {
        let owner = self.find_successor(self.space.hash_key(key)).await?;
        if owner == self.id {
            Ok(self.store.read().await.get(key))
        } else {
            self.forward_guard(hops)?;
            self.remote(owner).await?.get(key, hops + 1).await
        }
    }

    pub async fn contains(&self, key: &str, hops: u32) -> ChordResult<bool> {
        let owner = self.find_successor(self.space.hash_key(key)).await?;
        if owner == self.id {
            Ok(self.store.read().await.contains(key))
        } else {
            self.forward_guard(hops)?;
            self.remote(owner).await?.contains(key, hops + 1).await
        }
    }

    fn forward_guard(&self, hops: u32) -> ChordResult<()> {
        if hops >= HOP_LIMIT {
            return Err(ChordError::HopLimitExceeded(HOP_LIMIT));
        }
        Ok(())
    }

    /// Remove and return every local pair whose hash lies in (from, to].
    pub async fn pop_in_interval(&self, from: Id, to: Id) -> Vec<(String, String)> {
        self.store.write().await.extract_range(&self.space, from, to)
    }

    pub async fn merge_keys(&self, entries: Vec<(String, String)>) {
        if !entries.is_empty() {
            debug!("node {}: merging {} handed-off pairs", self.id, entries.len());
        }
        self.store.write().await.merge(entries);
    }

    /// Pull from the successor the keys this node now owns, i.e. everything
    /// hashed into (predecessor, self]. A no-op until both links exist and
    /// the node is not alone.
    pub async fn update_hash_table(&self) -> ChordResult<()> {
        let (successor, predecessor) = {
            let ft = self.finger_table.read().await;
            (ft.successor(), ft.predecessor())
        };
        let (Some(successor), Some(predecessor)) = (successor, predecessor) else {
            return Ok(());
        };
        if successor == self.id {
            return Ok(());
        }
        let moved = self
            .remote(successor)
            .await?
            .pop_interval(predecessor, self.id)
            .await?;
        if !moved.is_empty() {
            info!(
                "node {}: claimed {} keys from successor {}",
                self.id,
                moved.len(),
                successor
            );
            self.store.write().await.merge(moved);
        }
        Ok(())
    }

    // -- joining ------------------------------------------------------------

    /// Link into the ring through `anchor`. With stabilization the node only
    /// learns its successor and lets the periodic workers do the rest;
    /// without it the finger table is built eagerly and every affected node
    /// is updated before this call returns. `None` means this is the first
    /// node and the fresh table already describes the singleton ring.
    pub async fn join(&self, anchor: Option<Id>) -> ChordResult<()> {
        let Some(anchor) = anchor else {
            info!("node {}: starting a new ring", self.id);
            return Ok(());
        };
        let anchor = self.remote(anchor).await?;

        if self.config.use_stabilization {
            self.finger_table.write().await.clear_nodes();
            let successor = anchor.find_successor(self.id).await?;
            self.finger_table.write().await.set_successor(Some(successor));
            info!(
                "node {}: joined via {} with successor {}",
                self.id,
                anchor.id(),
                successor
            );
        } else {
            self.init_finger_table(&anchor).await?;
            self.update_others().await?;
            self.update_hash_table().await?;
            info!("node {}: joined via {}", self.id, anchor.id());
        }
        Ok(())
    }

    /// Build the whole table by asking the anchor. The three steps must run
    /// in order: the successor/predecessor writes feed the finger fill.
    async fn init_finger_table(&self, anchor: &RemoteNode) -> ChordResult<()> {
        let first_start = self.finger_table.read().await.entry(1).start();
        let successor_id = anchor.find_successor(first_start).await?;
        let successor = self.remote(successor_id).await?;

        let successors_predecessor = successor.predecessor_id().await?;
        {
            let mut ft = self.finger_table.write().await;
            ft.set_successor(Some(successor_id));
            ft.set_predecessor(successors_predecessor);
        }
        successor.set_predecessor(Some(self.id)).await?;

        for i in 1..self.space.bits() as usize {
            let (next_start, previous_node) = {
                let ft = self.finger_table.read().await;
                (ft.entry(i + 1).start(), ft.entry(i).node())
            };
            let Some(previous_node) = previous_node else {
                return Err(ChordError::NotJoined(self.id));
            };

            let node = if self.space.in_between(next_start, self.id, previous_node, true) {
                // The previous finger's target covers this start as well.
                previous_node
            } else {
                let found = anchor.find_successor(next_start).await?;
                if self.space.in_between(self.id, next_start, found, false) {
                    // We sit between the start and its old successor, so we
                    // are the closest successor now.
                    self.id
                } else {
                    found
                }
            };
            self.finger_table.write().await.set_node(i + 1, Some(node));
        }
        Ok(())
    }

    /// Tell every node whose finger table should now point at us. For each
    /// slot the walk starts at the predecessor of `self - 2^(i-1)` and keeps
    /// moving to predecessors while the update applies.
    async fn update_others(&self) -> ChordResult<()> {
        for i in 1..=self.space.bits() as usize {
            let target = self.space.sub(self.id, 1u64 << (i - 1));
            let mut node_id = self.find_predecessor(target).await?;

            let mut visited = std::collections::HashSet::new();
            while visited.insert(node_id) {
                let (_, next) = if node_id == self.id {
                    self.update_finger_table(self.id, i).await
                } else {
                    let response = self
                        .remote(node_id)
                        .await?
                        .update_finger_table(self.id, i)
                        .await?;
                    (response.applied, response.next)
                };
                match next {
                    Some(next) => node_id = next,
                    None => break,
                }
            }
        }
        Ok(())
    }

    /// One step of the finger-repair walk: adopt `node` for slot `index` when
    /// it falls between us and the slot's current target. Returns whether the
    /// slot changed and who the initiator should ask next.
    pub async fn update_finger_table(&self, node: Id, index: usize) -> (bool, Option<Id>) {
        let mut ft = self.finger_table.write().await;
        let applied = match ft.entry(index).node() {
            Some(current) => {
                self.space
                    .in_between(node, self.space.add(self.id, 1), current, false)
            }
            None => false,
        };
        if !applied {
            return (false, None);
        }
        ft.set_node(index, Some(node));
        debug!("node {}: finger {} now points at {}", self.id, index, node);
        let next = match ft.predecessor() {
            // When the new node is already our predecessor its own table is
            // correct; the walk ends here.
            Some(p) if p != node => Some(p),
            _ => None,
        };
        (true, next)
    }

    // -- stabilization ------------------------------------------------------

    /// Verify the successor link against the successor's predecessor, notify
    /// the successor of our existence, then reclaim any keys we own.
    pub async fn stabilize(&self) -> ChordResult<()> {
        let Some(successor_id) = self.successor_id().await else {
            return Ok(());
        };

        let candidate = if successor_id == self.id {
            self.predecessor_id().await
        } else {
            self.remote(successor_id).await?.predecessor_id().await?
        };

        let mut successor_id = successor_id;
        if let Some(candidate) = candidate {
            if self
                .space
                .in_between(candidate, self.space.add(self.id, 1), successor_id, false)
            {
                info!("node {}: successor is now {}", self.id, candidate);
                self.finger_table.write().await.set_successor(Some(candidate));
                successor_id = candidate;
            }
        }

        if successor_id == self.id {
            self.notify(self.id).await;
        } else {
            self.remote(successor_id).await?.notify(self.id).await?;
        }
        self.update_hash_table().await
    }

    /// A peer believes it is our predecessor. Invalidate a dead predecessor
    /// first, then adopt the caller when it sits between the current
    /// predecessor and us. Returns true when the caller was adopted, in which
    /// case it should be told to reclaim its keys.
    pub async fn notify(&self, caller: Id) -> bool {
        let predecessor = self.predecessor_id().await;
        if let Some(p) = predecessor {
            if p != caller && p != self.id {
                let alive = match self.remote(p).await {
                    Ok(remote) => remote.probe().await.is_ok(),
                    Err(_) => false,
                };
                if !alive {
                    warn!("node {}: predecessor {} stopped answering", self.id, p);
                    self.finger_table.write().await.set_predecessor(None);
                }
            }
        }

        let mut ft = self.finger_table.write().await;
        let adopt = match ft.predecessor() {
            None => true,
            Some(p) => self
                .space
                .in_between(caller, self.space.add(p, 1), self.id, false),
        };
        if adopt {
            info!("node {}: predecessor is now {}", self.id, caller);
            ft.set_predecessor(Some(caller));
        }
        adopt
    }

    /// Refresh one randomly chosen finger. Slot 1 belongs to `stabilize`,
    /// so the draw starts at 2.
    pub async fn fix_fingers(&self) -> ChordResult<()> {
        let m = self.space.bits();
        if m < 2 {
            return Ok(());
        }
        let slot = rand::thread_rng().gen_range(2..=m) as usize;
        let start = self.finger_table.read().await.entry(slot).start();
        let node = self.find_successor(start).await?;
        self.finger_table.write().await.set_node(slot, Some(node));
        debug!("node {}: refreshed finger {} -> {}", self.id, slot, node);
        Ok(())
    }

    // -- departure ----------------------------------------------------------

    /// Unlink from the ring and hand every stored key to the successor. On
    /// any transport failure the node stays linked and keeps its keys so the
    /// caller can retry; only a fully successful hand-off should be followed
    /// by shutdown.
    pub async fn disconnect(&self) -> ChordResult<()> {
        let (successor, predecessor) = {
            let ft = self.finger_table.read().await;
            (ft.successor(), ft.predecessor())
        };

        if let Some(successor) = successor {
            if successor != self.id {
                let predecessor = predecessor.filter(|p| *p != self.id);
                let successor_node = self.remote(successor).await?;
                successor_node.set_predecessor(predecessor).await?;
                if let Some(predecessor) = predecessor {
                    self.remote(predecessor)
                        .await?
                        .set_successor(Some(successor))
                        .await?;
                }

                let handoff = self.store.write().await.drain_all();
                if !handoff.is_empty() {
                    let count = handoff.len();
                    if let Err(e) = successor_node.merge_keys(handoff.clone()).await {
                        // Put the keys back; the departure did not happen.
                        self.store.write().await.merge(handoff);
                        return Err(e);
                    }
                    info!(
                        "node {}: handed {} keys to successor {}",
                        self.id, count, successor
                    );
                }
            }
        }
        info!("node {}: leaving the ring", self.id);
        Ok(())
    }
}

/// The lookup walk's view of the node it lives on: answers from local state,
/// no I/O.
struct LocalView<'a>(&'a ChordNode);

#[async_trait(?Send)]
impl RingView for LocalView<'_> {
    fn ring_id(&self) -> Id {
        self.0.id
    }

    async fn view_successor_id(&self) -> ChordResult<Option<Id>> {
        Ok(self.0.successor_id().await)
    }

    async fn view_closest_preceding_finger(&self, key: Id, skip: &[Id]) -> ChordResult<Id> {
        Ok(self.0.closest_preceding_finger(key, skip).await)
    }
}
