use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use aws_sdk_s3::Client;
use tracing::debug;

use crate::config::ClientConfig;

static CLIENT_CACHE: LazyLock<ClientCache> = LazyLock::new(ClientCache::default);

/// Built S3 clients keyed by `ClientConfig::identity`.
#[derive(Debug, Default)]
pub struct ClientCache {
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl ClientCache {
    pub fn global() -> &'static ClientCache {
        &CLIENT_CACHE
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Client>>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn get_or_create(&self, identity: &str, client_config: &ClientConfig) -> Arc<Client> {
        if let Some(client) = self.get(identity) {
            return client;
        }

        let client = Arc::new(client_config.create_client().await);

        // Another task may have built the same client while this one was awaiting.
        let mut clients = self.lock();
        let client = clients
            .entry(identity.to_string())
            .or_insert(client)
            .clone();
        debug!(endpoint = client_config.endpoint_url, "s3 client has been created.");
        client
    }

    pub fn get(&self, identity: &str) -> Option<Arc<Client>> {
        self.lock().get(identity).cloned()
    }

    pub fn remove(&self, identity: &str) -> bool {
        let removed = self.lock().remove(identity).is_some();
        if removed {
            debug!("cached s3 client has been removed.");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
