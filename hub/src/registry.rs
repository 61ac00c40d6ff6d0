use crate::client::{Client, ClientId};
use crate::message::{Envelope, Presence, UserId};
use log::*;
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;

struct Entry {
    client: Client,
    /// User id this client was indexed under when it was registered.
    indexed_as: Option<UserId>,
}

/// Registered clients with a secondary index by user id.
///
/// Owned by the hub's control loop and never shared, so every read and write
/// happens inside a single loop step.
#[derive(Default)]
pub(crate) struct Registry {
    /// Primary storage: every registered client, keyed by connection id
    clients: HashMap<ClientId, Entry>,

    /// Secondary index: user id to the client that announced it
    user_index: HashMap<UserId, ClientId>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// Adds a client, indexing it by the user id it carries right now.
    pub(crate) fn insert(&mut self, client: Client) {
        let id = client.id();
        let indexed_as = client.user_id().map(str::to_owned);

        let entry = Entry {
            client,
            indexed_as: indexed_as.clone(),
        };
        if let Some(previous) = self.clients.insert(id, entry) {
            warn!("Client {id} was registered twice, replacing its previous entry");
            self.unindex(id, previous.indexed_as);
            previous.client.seal();
        }

        if let Some(user_id) = indexed_as {
            self.user_index.insert(user_id, id);
        }
    }

    /// Removes a client from both indices and hands it back to the caller.
    pub(crate) fn remove(&mut self, id: &ClientId) -> Option<Client> {
        let entry = self.clients.remove(id)?;
        self.unindex(*id, entry.indexed_as);
        Some(entry.client)
    }

    /// Releases `id`'s claim on its user id. The index entry is left alone if
    /// another client owns it by now, and handed to a remaining client that
    /// was registered under the same user id otherwise.
    fn unindex(&mut self, id: ClientId, indexed_as: Option<UserId>) {
        let Some(user_id) = indexed_as else {
            return;
        };
        if self.user_index.get(&user_id) != Some(&id) {
            return;
        }

        let successor = self
            .clients
            .iter()
            .find(|(other, entry)| **other != id && entry.indexed_as.as_ref() == Some(&user_id))
            .map(|(other, _)| *other);

        match successor {
            Some(other) => {
                debug!("User {user_id} is now indexed to client {other}");
                self.user_index.insert(user_id, other);
            }
            None => {
                self.user_index.remove(&user_id);
            }
        }
    }

    pub(crate) fn presence(&self) -> Presence {
        let mut online_users: Vec<UserId> = self.user_index.keys().cloned().collect();
        online_users.sort();

        Presence {
            total_clients: self.clients.len(),
            online_users,
        }
    }

    /// Offers `envelope` to every registered client without waiting. Clients
    /// whose queue is full, or whose outbound pump has stopped, are removed
    /// and their queue sealed. Returns how many clients were evicted.
    pub(crate) fn fan_out(&mut self, envelope: &Envelope) -> usize {
        let mut evicted = Vec::new();

        for (id, entry) in &self.clients {
            match entry.client.try_deliver(envelope.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => evicted.push((*id, "outbound queue is full")),
                Err(TrySendError::Closed(_)) => evicted.push((*id, "outbound pump has stopped")),
            }
        }

        let count = evicted.len();
        for (id, reason) in evicted {
            if let Some(client) = self.remove(&id) {
                warn!(
                    "Evicting client {id} ({}): {reason}",
                    client.user_id().unwrap_or("-")
                );
                client.seal();
            }
        }

        count
    }

    /// Empties the registry, sealing every client's queue.
    pub(crate) fn seal_all(&mut self) -> usize {
        self.user_index.clear();
        let count = self.clients.len();
        for (_, entry) in self.clients.drain() {
            entry.client.seal();
        }
        count
    }
}
