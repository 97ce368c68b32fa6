use slatedb::Db;
use slatedb::object_store::ObjectStore;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use slatedb::object_store::path::Path;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::txn::Transaction;

/// Read access shared by the store and by open transactions.
pub trait KvRead: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = anyhow::Result<Option<Vec<u8>>>> + Send;

    fn list_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<(String, Vec<u8>)>>> + Send;
}

/// Persistent state store backed by SlateDB on a local filesystem.
///
/// All writes go through [`StateStore::begin`]. Transactions are serialised
/// by a store-wide writer lock and applied as one atomic write batch.
#[derive(Clone)]
pub struct StateStore {
    db: Db,
    writer: Arc<Mutex<()>>,
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB state store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        Self::open(object_store).await
    }

    /// Open a throwaway store held entirely in memory.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::open(Arc::new(InMemory::new())).await
    }

    async fn open(object_store: Arc<dyn ObjectStore>) -> anyhow::Result<Self> {
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self {
            db,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Start a write transaction. Waits for any other open transaction to
    /// finish first.
    pub async fn begin(&self) -> Transaction {
        let guard = self.writer.clone().lock_owned().await;
        Transaction::new(self.clone(), guard)
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }
}

impl KvRead for StateStore {
    /// Retrieve the value for a key, or `None` if it does not exist.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed: {}", e)),
        }
    }

    /// List all key-value pairs whose keys start with `prefix`.
    /// Returns them as `(key_string, raw_bytes)`.
    async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;

        while let Some(kv) = iter
            .next()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan failed: {}", e))?
        {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }
}
