use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::RPC_TIMEOUT_MS;
use crate::error::{ChordError, ChordResult};
use crate::finger::FingerEntry;
use crate::ring::Id;

/// Header carrying the hop count on forwarded storage requests.
pub const HOP_HEADER: &str = "X-Chord-Hop-Count";

// ---------------------------------------------------------------------------
// Wire messages. The protocol is data-only: identifiers travel, handles do
// not. A caller that wants to talk to an id it received re-resolves it
// through the directory.
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct IdMsg {
    pub id: Id,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OptionalIdMsg {
    pub id: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub anchor: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub id: Id,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateFingerRequest {
    pub node: Id,
    pub index: usize,
}

/// Reply to an update-finger-table step: whether the slot was rewritten and
/// which node the initiator should visit next (the predecessor, unless the
/// walk is over).
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateFingerResponse {
    pub applied: bool,
    pub next: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PopIntervalRequest {
    pub from: Id,
    pub to: Id,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyBatch {
    pub entries: Vec<(String, String)>,
}

/// Shared HTTP client for every outbound call a process makes.
pub fn http_client() -> ChordResult<Client> {
    Ok(Client::builder().build()?)
}

// ---------------------------------------------------------------------------
// Remote node handle
// ---------------------------------------------------------------------------

/// A peer as seen over the wire: an identifier, a base URI fetched from the
/// directory, and the shared client. Nothing about it is cached or alive.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    id: Id,
    base_url: String,
    client: Client,
}

impl RemoteNode {
    pub fn new(id: Id, base_url: impl Into<String>, client: Client) -> RemoteNode {
        RemoteNode {
            id,
            base_url: base_url.into(),
            client,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn timeout() -> Duration {
        Duration::from_millis(RPC_TIMEOUT_MS)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ChordResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .timeout(Self::timeout())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status(path, response.status()));
        }
        Ok(response.json().await?)
    }

    async fn get_json_query<Q: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Q,
    ) -> ChordResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .timeout(Self::timeout())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status(path, response.status()));
        }
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> ChordResult<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .timeout(Self::timeout())
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status(path, response.status()));
        }
        Ok(response)
    }

    async fn post_empty(&self, path: &str) -> ChordResult<()> {
        let response = self
            .client
            .post(self.url(path))
            .timeout(Self::timeout())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status(path, response.status()));
        }
        Ok(())
    }

    async fn put_json<B: Serialize>(&self, path: &str, body: &B) -> ChordResult<()> {
        let response = self
            .client
            .put(self.url(path))
            .timeout(Self::timeout())
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status(path, response.status()));
        }
        Ok(())
    }

    /// Cheap liveness read of the remote id.
    pub async fn probe(&self) -> ChordResult<Id> {
        Ok(self.get_json::<IdMsg>("/internal/id").await?.id)
    }

    pub async fn successor_id(&self) -> ChordResult<Option<Id>> {
        Ok(self
            .get_json::<OptionalIdMsg>("/internal/successor")
            .await?
            .id)
    }

    pub async fn predecessor_id(&self) -> ChordResult<Option<Id>> {
        Ok(self
            .get_json::<OptionalIdMsg>("/internal/predecessor")
            .await?
            .id)
    }

    pub async fn set_successor(&self, id: Option<Id>) -> ChordResult<()> {
        self.put_json("/internal/successor", &OptionalIdMsg { id })
            .await
    }

    pub async fn set_predecessor(&self, id: Option<Id>) -> ChordResult<()> {
        self.put_json("/internal/predecessor", &OptionalIdMsg { id })
            .await
    }

    pub async fn find_successor(&self, key: Id) -> ChordResult<Id> {
        let msg: IdMsg = self
            .get_json_query("/internal/find-successor", &[("id", key)])
            .await?;
        Ok(msg.id)
    }

    pub async fn find_predecessor(&self, key: Id) -> ChordResult<Id> {
        let msg: IdMsg = self
            .get_json_query("/internal/find-predecessor", &[("id", key)])
            .await?;
        Ok(msg.id)
    }

    pub async fn closest_preceding_finger(&self, key: Id, skip: &[Id]) -> ChordResult<Id> {
        let mut query = vec![("id".to_string(), key.to_string())];
        if !skip.is_empty() {
            let joined = skip
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            query.push(("skip".to_string(), joined));
        }
        let msg: IdMsg = self
            .get_json_query("/internal/closest-preceding-finger", &query)
            .await?;
        Ok(msg.id)
    }

    pub async fn join(&self, anchor: Option<Id>) -> ChordResult<()> {
        // An atomic join fans out into many calls on the remote side; give it
        // more room than a single-hop read.
        let response = self
            .client
            .post(self.url("/internal/join"))
            .timeout(Self::timeout() * 10)
            .json(&JoinRequest { anchor })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status("join", response.status()));
        }
        Ok(())
    }

    pub async fn notify(&self, caller: Id) -> ChordResult<()> {
        self.post_json("/internal/notify", &NotifyRequest { id: caller })
            .await?;
        Ok(())
    }

    pub async fn update_finger_table(
        &self,
        node: Id,
        index: usize,
    ) -> ChordResult<UpdateFingerResponse> {
        let response = self
            .post_json("/internal/update-finger-table", &UpdateFingerRequest { node, index })
            .await?;
        Ok(response.json().await?)
    }

    pub async fn pop_interval(&self, from: Id, to: Id) -> ChordResult<Vec<(String, String)>> {
        let response = self
            .post_json("/internal/pop-interval", &PopIntervalRequest { from, to })
            .await?;
        let batch: KeyBatch = response.json().await?;
        Ok(batch.entries)
    }

    /// Ask the node to pull from its successor the keys it now owns.
    pub async fn pull_keys(&self) -> ChordResult<()> {
        self.post_empty("/internal/pull-keys").await
    }

    pub async fn merge_keys(&self, entries: Vec<(String, String)>) -> ChordResult<()> {
        self.post_json("/internal/merge-keys", &KeyBatch { entries })
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> ChordResult<()> {
        // Departure rewires both neighbors and ships the whole store before
        // answering.
        let response = self
            .client
            .post(self.url("/internal/disconnect"))
            .timeout(Self::timeout() * 5)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status("disconnect", response.status()));
        }
        Ok(())
    }

    pub async fn finger_table(&self) -> ChordResult<Vec<FingerEntry>> {
        self.get_json("/internal/finger-table").await
    }

    pub async fn keys(&self) -> ChordResult<Vec<String>> {
        self.get_json("/internal/keys").await
    }

    pub async fn insert(&self, key: &str, value: &str, hops: u32) -> ChordResult<()> {
        let response = self
            .client
            .put(self.url(&format!("/storage/{key}")))
            .timeout(Self::timeout())
            .header(HOP_HEADER, hops.to_string())
            .body(value.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChordError::bad_status("insert", response.status()));
        }
        Ok(())
    }

    pub async fn get(&self, key: &str, hops: u32) -> ChordResult<Option<String>> {
        let response = self
            .client
            .get(self.url(&format!("/storage/{key}")))
            .timeout(Self::timeout())
            .header(HOP_HEADER, hops.to_string())
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(Some(response.text().await?)),
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(ChordError::bad_status("get", status)),
        }
    }

    pub async fn contains(&self, key: &str, hops: u32) -> ChordResult<bool> {
        let response = self
            .client
            .head(self.url(&format!("/storage/{key}")))
            .timeout(Self::timeout())
            .header(HOP_HEADER, hops.to_string())
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(ChordError::bad_status("contains", status)),
        }
    }
}

// ---------------------------------------------------------------------------
// Ring view
// ---------------------------------------------------------------------------

/// The three reads a lookup walk needs from whichever node it is currently
/// standing on. The node's own view answers from memory; a remote view pays
/// an RPC per read.
#[async_trait(?Send)]
pub trait RingView {
    fn ring_id(&self) -> Id;
    async fn view_successor_id(&self) -> ChordResult<Option<Id>>;
    async fn view_closest_preceding_finger(&self, key: Id, skip: &[Id]) -> ChordResult<Id>;
}

#[async_trait(?Send)]
impl RingView for RemoteNode {
    fn ring_id(&self) -> Id {
        self.id
    }

    async fn view_successor_id(&self) -> ChordResult<Option<Id>> {
        self.successor_id().await
    }

    async fn view_closest_preceding_finger(&self, key: Id, skip: &[Id]) -> ChordResult<Id> {
        self.closest_preceding_finger(key, skip).await
    }
}
