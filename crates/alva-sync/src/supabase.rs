use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use alva_core::security::Credentials;
use alva_core::{Backend, BackendError, ChangeStream, FetchQuery, NewTask, Table, Task, TaskId};

use crate::realtime::{socket_url, RealtimeClient, RealtimeConfig};
use crate::rest::RestClient;

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub realtime: RealtimeConfig,
}

/// The hosted backend: PostgREST for reads and commands, one realtime
/// socket for every change feed. The socket is opened on first subscribe
/// and reopened by the first subscribe after it dies.
pub struct SupabaseBackend {
    config: SupabaseConfig,
    credentials: Credentials,
    rest: RestClient,
    socket: Mutex<Option<Arc<RealtimeClient>>>,
}

impl SupabaseBackend {
    pub fn new(config: SupabaseConfig, credentials: Credentials) -> Result<Self, BackendError> {
        let rest = RestClient::new(&config.base_url, credentials.clone(), config.request_timeout)?;
        Ok(Self {
            config,
            credentials,
            rest,
            socket: Mutex::new(None),
        })
    }

    async fn socket(&self) -> Result<Arc<RealtimeClient>, BackendError> {
        let mut socket = self.socket.lock().await;
        if let Some(client) = socket.as_ref().filter(|c| c.is_connected()) {
            return Ok(Arc::clone(client));
        }
        if socket.is_some() {
            info!("realtime socket gone, reconnecting");
        }
        let url = socket_url(&self.config.base_url, self.credentials.anon_key.expose());
        let client = Arc::new(
            RealtimeClient::connect(&url, self.credentials.bearer().to_string(), self.config.realtime).await?,
        );
        *socket = Some(Arc::clone(&client));
        Ok(client)
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Value>, BackendError> {
        self.rest.fetch(query).await
    }

    async fn subscribe(&self, table: Table) -> Result<ChangeStream, BackendError> {
        let stream = self.socket().await?.subscribe(table).await?;
        Ok(Box::pin(stream))
    }

    async fn insert_task(&self, task: &NewTask) -> Result<Task, BackendError> {
        self.rest.insert_task(task).await
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError> {
        self.rest.delete_task(id).await
    }
}
