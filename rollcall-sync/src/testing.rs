//! Test fixtures: an in-memory remote store and a fully wired context

use crate::audit::AuditLog;
use crate::cache::CacheFirstReader;
use crate::dispatch::Dispatcher;
use crate::error::{SyncError, SyncResult};
use crate::local_db::{LocalDatabase, LocalDbConfig};
use crate::model::{Mark, Member, Record, RecordId, StoreName, UserRoleInfo};
use crate::network::NetworkMonitor;
use crate::queue::PendingWriteQueue;
use crate::remote::{RemoteApi, GET_USER_ROLE_RPC, SET_USER_ROLE_RPC};
use crate::roles::RoleService;
use crate::secure_store::SecureStore;
use crate::sync_engine::{SyncEngine, DEFAULT_BATCH_SIZE};
use crate::write_path::WritePath;
use async_trait::async_trait;
use chrono::NaiveDate;
use crypto::{Aes256GcmEncryptor, KeyProvider, KeyWrapper};
use events_bus::EventBus;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Injected failure for every call against one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Network,
    Permission,
    /// Permanent rejection, e.g. a schema mismatch
    Rejected,
}

impl Failure {
    fn to_error(self) -> SyncError {
        match self {
            Failure::Network => SyncError::Network("simulated outage".to_string()),
            Failure::Permission => SyncError::Permission("row-level security".to_string()),
            Failure::Rejected => SyncError::Remote {
                status: 400,
                message: "simulated rejection".to_string(),
            },
        }
    }
}

#[derive(Default)]
pub struct FakeRemote {
    tables: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    roles: Mutex<HashMap<String, UserRoleInfo>>,
    failures: Mutex<HashMap<String, Failure>>,
    lost_responses: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed<T: Record>(&self, store: &StoreName, record: &T) {
        let row = serde_json::to_value(record).unwrap();
        self.tables
            .lock()
            .entry(store.to_string())
            .or_default()
            .insert(record.record_id(), row);
    }

    pub fn row(&self, store: &StoreName, id: &str) -> Option<Value> {
        self.tables.lock().get(store.as_str()).and_then(|t| t.get(id).cloned())
    }

    pub fn rows(&self, store: &StoreName) -> Vec<Value> {
        self.tables
            .lock()
            .get(store.as_str())
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn fail(&self, store: &StoreName, failure: Failure) {
        self.failures.lock().insert(store.to_string(), failure);
    }

    pub fn clear_failure(&self, store: &StoreName) {
        self.failures.lock().remove(store.as_str());
    }

    /// The next insert into `store` commits but its response is lost
    pub fn lose_next_response(&self, store: &StoreName) {
        self.lost_responses.lock().insert(store.to_string());
    }

    pub fn set_remote_role(&self, user_id: &str, info: UserRoleInfo) {
        self.roles.lock().insert(user_id.to_string(), info);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, target: &str) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().get(target) {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn key_of(store: &StoreName, row: &Value) -> Option<String> {
        row.get(store.key_column()).and_then(Value::as_str).map(str::to_string)
    }

    fn assign_key(&self, store: &StoreName, row: &mut Value) -> String {
        if let Some(key) = Self::key_of(store, row) {
            return key;
        }
        let key = format!("srv_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        if let Value::Object(fields) = row {
            fields.insert(store.key_column().to_string(), Value::String(key.clone()));
        }
        key
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn select_all(&self, store: &StoreName) -> SyncResult<Vec<Value>> {
        self.enter(store.as_str())?;
        Ok(self.rows(store))
    }

    async fn select_one(&self, store: &StoreName, id: &str) -> SyncResult<Option<Value>> {
        self.enter(store.as_str())?;
        Ok(self.row(store, id))
    }

    async fn insert(&self, store: &StoreName, mut row: Value) -> SyncResult<Value> {
        self.enter(store.as_str())?;
        let key = self.assign_key(store, &mut row);
        let mut tables = self.tables.lock();
        let table = tables.entry(store.to_string()).or_default();
        if table.contains_key(&key) {
            return Err(SyncError::UniqueViolation(format!("duplicate key {key}")));
        }
        table.insert(key, row.clone());
        if self.lost_responses.lock().remove(store.as_str()) {
            return Err(SyncError::Network("connection reset".to_string()));
        }
        Ok(row)
    }

    async fn update(&self, store: &StoreName, id: &str, row: Value) -> SyncResult<Option<Value>> {
        self.enter(store.as_str())?;
        let mut tables = self.tables.lock();
        let Some(existing) = tables.get_mut(store.as_str()).and_then(|t| t.get_mut(id)) else {
            return Ok(None);
        };
        if let (Value::Object(current), Value::Object(patch)) = (&mut *existing, row) {
            current.extend(patch);
        }
        Ok(Some(existing.clone()))
    }

    async fn upsert(&self, store: &StoreName, mut row: Value) -> SyncResult<Value> {
        self.enter(store.as_str())?;
        let key = self.assign_key(store, &mut row);
        self.tables
            .lock()
            .entry(store.to_string())
            .or_default()
            .insert(key, row.clone());
        Ok(row)
    }

    async fn delete(&self, store: &StoreName, id: &str) -> SyncResult<()> {
        self.enter(store.as_str())?;
        if let Some(table) = self.tables.lock().get_mut(store.as_str()) {
            table.remove(id);
        }
        Ok(())
    }

    async fn rpc(&self, function: &str, args: Value) -> SyncResult<Value> {
        self.enter("rpc")?;
        let user_id = args
            .get("user_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match function {
            GET_USER_ROLE_RPC => Ok(self
                .roles
                .lock()
                .get(&user_id)
                .map(|info| serde_json::to_value(info).unwrap())
                .unwrap_or(Value::Null)),
            SET_USER_ROLE_RPC => {
                if args["role"].is_null() {
                    self.roles.lock().remove(&user_id);
                } else {
                    let info: UserRoleInfo = serde_json::from_value(serde_json::json!({
                        "role": args["role"],
                        "sections": args["sections"],
                    }))?;
                    self.roles.lock().insert(user_id, info);
                }
                Ok(Value::Null)
            }
            other => Err(SyncError::Remote {
                status: 404,
                message: format!("unknown function {other}"),
            }),
        }
    }
}

pub fn sample_member(id: &str) -> Member {
    Member {
        id: RecordId::new(id),
        name: "Sam Carter".to_string(),
        squad: 1,
        year: "Year 9".to_string(),
        is_squad_leader: false,
        marks: vec![Mark::absent(NaiveDate::from_ymd_opt(2024, 9, 6).unwrap())],
    }
}

/// Every component wired against a temp database and a [`FakeRemote`]
pub struct TestContext {
    _dir: TempDir,
    pub db: LocalDatabase,
    pub store: SecureStore,
    pub queue: PendingWriteQueue,
    pub remote: Arc<FakeRemote>,
    pub network: NetworkMonitor,
    pub events: EventBus,
    pub dispatcher: Dispatcher,
    pub write_path: WritePath,
    pub engine: Arc<SyncEngine>,
    pub reader: CacheFirstReader,
    pub audit: AuditLog,
    pub roles: RoleService,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = LocalDatabase::new(LocalDbConfig {
            db_path: dir.path().join("rollcall.db").to_str().unwrap().to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let keys = KeyProvider::new(
            Arc::new(db.clone()),
            KeyWrapper::new(Aes256GcmEncryptor::generate_key()).unwrap(),
        );
        let key = keys.get_or_create_key("user-1").await.unwrap();

        let remote = Arc::new(FakeRemote::new());
        let remote_api: Arc<dyn RemoteApi> = remote.clone();
        let network = NetworkMonitor::new(true);
        let events = EventBus::default();
        let store = SecureStore::new(db.clone(), key);
        let queue = PendingWriteQueue::new(db.clone());
        let dispatcher = Dispatcher::new(remote_api.clone(), store.clone(), queue.clone());
        let write_path = WritePath::new(dispatcher.clone(), queue.clone(), network.clone());

        Self {
            engine: Arc::new(SyncEngine::new(
                dispatcher.clone(),
                queue.clone(),
                network.clone(),
                DEFAULT_BATCH_SIZE,
            )),
            reader: CacheFirstReader::new(
                store.clone(),
                queue.clone(),
                remote_api.clone(),
                network.clone(),
                events.clone(),
            ),
            audit: AuditLog::new(write_path.clone(), store.clone(), queue.clone()),
            roles: RoleService::new(
                db.clone(),
                queue.clone(),
                remote_api,
                network.clone(),
                events.clone(),
            ),
            _dir: dir,
            db,
            store,
            queue,
            remote,
            network,
            events,
            dispatcher,
            write_path,
        }
    }
}
