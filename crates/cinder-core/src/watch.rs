//! Per-shard registry of live subscriptions.
//!
//! A client (identified by its [`ClientId`]) can hold any number of live
//! queries and channel subscriptions. The registry only answers "who is
//! interested in this key / channel"; building and publishing the update
//! payload is the shard's job.

use std::collections::{BTreeSet, HashMap};

use crate::query::WatchQuery;
use crate::shard::ClientId;

#[derive(Debug, Default)]
struct ClientSubscriptions {
    queries: Vec<WatchQuery>,
    channels: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct WatchRegistry {
    clients: HashMap<ClientId, ClientSubscriptions>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live query. Registering the same query text twice for
    /// one client is a no-op.
    pub fn add_query(&mut self, client: ClientId, query: WatchQuery) {
        let subs = self.clients.entry(client).or_default();
        if !subs.queries.iter().any(|q| q.text() == query.text()) {
            subs.queries.push(query);
        }
    }

    /// Subscribes a client to a channel. Returns the client's total number
    /// of channel subscriptions afterwards.
    pub fn add_channel(&mut self, client: ClientId, channel: &str) -> usize {
        let subs = self.clients.entry(client).or_default();
        subs.channels.insert(channel.to_owned());
        subs.channels.len()
    }

    /// Drops every subscription held by `client`. Returns true if it had any.
    pub fn forget(&mut self, client: ClientId) -> bool {
        self.clients.remove(&client).is_some()
    }

    /// Every (client, query) pair whose pattern matches at least one of
    /// `keys`. Each pair appears once no matter how many keys matched.
    pub fn queries_touching<'a>(&'a self, keys: &[String]) -> Vec<(ClientId, &'a WatchQuery)> {
        let mut hits = Vec::new();
        for (client, subs) in &self.clients {
            for query in &subs.queries {
                if keys.iter().any(|k| query.matches_key(k)) {
                    hits.push((*client, query));
                }
            }
        }
        hits.sort_by_key(|(client, _)| *client);
        hits
    }

    /// Clients subscribed to `channel`, in id order.
    pub fn channel_subscribers(&self, channel: &str) -> Vec<ClientId> {
        let mut ids: Vec<_> = self
            .clients
            .iter()
            .filter(|(_, subs)| subs.channels.contains(channel))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Number of clients holding at least one subscription.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
