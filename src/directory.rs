use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Routing entry for one live worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Remote address of the worker's control connection as seen by the master.
    #[serde(rename = "tcpAddress")]
    pub control_address: SocketAddr,
    pub host: String,
    #[serde(rename = "httpAddress")]
    pub http_base_address: String,
    #[serde(rename = "filePaths")]
    pub file_paths: Vec<String>,
}

/// Live map from worker host to its last announcement.
///
/// Cloning shares the same map. The lock is only ever held for in-memory
/// map operations.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    workers: Arc<RwLock<HashMap<String, WorkerRecord>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace the record for `record.host`.
    ///
    /// A connection owns at most one record: if the same control address
    /// previously announced under another host, that record is dropped.
    pub async fn upsert(&self, record: WorkerRecord) -> Option<WorkerRecord> {
        let mut workers = self.workers.write().await;
        workers.retain(|host, w| {
            *host == record.host || w.control_address != record.control_address
        });
        workers.insert(record.host.clone(), record)
    }

    /// Drop every record owned by the connection at `addr`.
    ///
    /// A worker that already re-registered from a new connection carries a
    /// different address and is left alone.
    pub async fn remove_by_control_address(&self, addr: SocketAddr) -> Vec<WorkerRecord> {
        let mut workers = self.workers.write().await;
        let hosts: Vec<String> = workers
            .values()
            .filter(|w| w.control_address == addr)
            .map(|w| w.host.clone())
            .collect();
        hosts.iter().filter_map(|host| workers.remove(host)).collect()
    }

    pub async fn get(&self, host: &str) -> Option<WorkerRecord> {
        self.workers.read().await.get(host).cloned()
    }

    /// Snapshot of all records, ordered by host.
    pub async fn list(&self) -> Vec<WorkerRecord> {
        let mut records: Vec<WorkerRecord> = self.workers.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.host.cmp(&b.host));
        records
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }
}
