#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dbfleet::backend::FleetBackend;
use dbfleet::config::ReconcileConfig;
use dbfleet::error::BackendError;
use dbfleet::fleet::{self, FleetEvent, FleetHandle};
use dbfleet_schema::{
    ConsoleLogs, CreateDatabaseRequest, DatabaseDescriptor, DatabaseKind, DatabaseStatus,
    RejectionBody, UpdateDatabaseRequest,
};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{Notify, broadcast};

/// In-memory control plane. Commands move a database into the transitional
/// state; tests decide when (and how) it settles.
#[derive(Default)]
pub struct ScriptedBackend {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    databases: BTreeMap<u64, DatabaseDescriptor>,
    next_id: u64,
    failing_lists: u32,
    reject_next: Option<(StatusCode, String)>,
    hang_next_stop: bool,
    held_create: Option<(DatabaseStatus, Arc<Notify>)>,
    calls: Vec<String>,
}

pub fn descriptor(id: u64, name: &str, status: DatabaseStatus) -> DatabaseDescriptor {
    let port = 5432 + id as u16;
    DatabaseDescriptor {
        id,
        name: name.to_string(),
        kind: DatabaseKind::Postgresql,
        state: status,
        port: Some(port),
        connection_string: (status == DatabaseStatus::Running)
            .then(|| format!("postgresql://localhost:{port}/{name}")),
        container_id: None,
        created_at: Utc.with_ymd_and_hms(2025, 2, 8, 10, 0, 0).unwrap()
            + chrono::Duration::minutes(id as i64),
        updated_at: None,
    }
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, id: u64, name: &str, status: DatabaseStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.databases.insert(id, descriptor(id, name, status));
        inner.next_id = inner.next_id.max(id);
    }

    pub fn set_status(&self, id: u64, status: DatabaseStatus) {
        let mut inner = self.inner.lock().unwrap();
        let db = inner.databases.get_mut(&id).expect("seeded database");
        db.state = status;
        let port = db.port.unwrap_or(5432 + id as u16);
        db.connection_string = (status == DatabaseStatus::Running)
            .then(|| format!("postgresql://localhost:{port}/{}", db.name));
    }

    pub fn remove(&self, id: u64) {
        self.inner.lock().unwrap().databases.remove(&id);
    }

    pub fn fail_next_lists(&self, n: u32) {
        self.inner.lock().unwrap().failing_lists = n;
    }

    pub fn reject_next_write(&self, status: StatusCode, reason: &str) {
        self.inner.lock().unwrap().reject_next = Some((status, reason.to_string()));
    }

    /// The next `stop` is recorded but never answers.
    pub fn hang_next_stop(&self) {
        self.inner.lock().unwrap().hang_next_stop = true;
    }

    /// The next create stores `stored` but replies `PROVISIONING` only once the
    /// returned gate is notified.
    pub fn hold_next_create(&self, stored: DatabaseStatus) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.inner.lock().unwrap().held_create = Some((stored, gate.clone()));
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == op).count()
    }

    fn command(&self, op: &str, id: u64, next: DatabaseStatus) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(op.to_string());
        if let Some((status, reason)) = inner.reject_next.take() {
            return Err(rejected(status, &reason));
        }
        match inner.databases.get_mut(&id) {
            Some(db) => {
                db.state = next;
                db.connection_string = None;
                Ok(())
            }
            None => Err(rejected(StatusCode::NOT_FOUND, "database not found")),
        }
    }
}

pub fn rejected(status: StatusCode, reason: &str) -> BackendError {
    BackendError::Rejected {
        status,
        body: RejectionBody {
            reason: Some(reason.to_string()),
            message: None,
        },
    }
}

#[async_trait]
impl FleetBackend for ScriptedBackend {
    async fn list(&self) -> Result<Vec<DatabaseDescriptor>, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push("list".to_string());
        if inner.failing_lists > 0 {
            inner.failing_lists -= 1;
            return Err(BackendError::UnexpectedStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "control plane unavailable".to_string(),
            });
        }
        Ok(inner.databases.values().cloned().collect())
    }

    async fn create(
        &self,
        req: &CreateDatabaseRequest,
    ) -> Result<DatabaseDescriptor, BackendError> {
        let (reply, gate) = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push("create".to_string());
            if let Some((status, reason)) = inner.reject_next.take() {
                return Err(rejected(status, &reason));
            }
            inner.next_id += 1;
            let id = inner.next_id;
            let build = |status| {
                let mut db = descriptor(id, &req.name, status);
                db.kind = req.kind;
                db.port = req.port.or(db.port);
                db
            };
            let reply = build(DatabaseStatus::Provisioning);
            let (stored, gate) = match inner.held_create.take() {
                Some((status, gate)) => (build(status), Some(gate)),
                None => (reply.clone(), None),
            };
            inner.databases.insert(id, stored);
            (reply, gate)
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(reply)
    }

    async fn update(&self, name: &str, req: &UpdateDatabaseRequest) -> Result<(), BackendError> {
        let id = {
            let inner = self.inner.lock().unwrap();
            inner
                .databases
                .values()
                .find(|db| db.name == name)
                .map(|db| db.id)
        };
        let Some(id) = id else {
            self.inner.lock().unwrap().calls.push("update".to_string());
            return Err(rejected(StatusCode::NOT_FOUND, "database not found"));
        };
        self.command("update", id, DatabaseStatus::Updating)?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(db) = inner.databases.get_mut(&id) {
            if let Some(new_name) = &req.new_name {
                db.name = new_name.clone();
            }
            if let Some(port) = req.port {
                db.port = Some(port);
            }
        }
        Ok(())
    }

    async fn delete(&self, id: u64) -> Result<(), BackendError> {
        self.command("delete", id, DatabaseStatus::Destroying)
    }

    async fn start(&self, id: u64) -> Result<(), BackendError> {
        self.command("start", id, DatabaseStatus::Starting)
    }

    async fn stop(&self, id: u64) -> Result<(), BackendError> {
        let hang = {
            let mut inner = self.inner.lock().unwrap();
            std::mem::take(&mut inner.hang_next_stop)
        };
        if hang {
            self.inner.lock().unwrap().calls.push("stop".to_string());
            std::future::pending::<()>().await;
        }
        self.command("stop", id, DatabaseStatus::Stopping)
    }

    async fn logs(
        &self,
        id: u64,
        tail: usize,
        filter: Option<&str>,
    ) -> Result<ConsoleLogs, BackendError> {
        let inner = self.inner.lock().unwrap();
        if !inner.databases.contains_key(&id) {
            return Err(rejected(StatusCode::NOT_FOUND, "database not found"));
        }
        let lines: Vec<String> = (1..=3)
            .map(|n| format!("line {n}"))
            .filter(|l| filter.is_none_or(|f| l.contains(f)))
            .take(tail)
            .collect();
        Ok(ConsoleLogs {
            total: lines.len(),
            lines,
        })
    }

    async fn inspect(&self, id: u64) -> Result<Value, BackendError> {
        Ok(json!({ "id": id, "State": { "Running": true } }))
    }
}

/// Long interval so ticks only happen through `resync` in tests.
pub fn test_config() -> ReconcileConfig {
    ReconcileConfig {
        poll_interval_ms: 3_600_000,
        degraded_after: 3,
        expectation_ticks: 20,
        event_capacity: 64,
    }
}

pub async fn spawn_fleet(backend: Arc<ScriptedBackend>) -> FleetHandle {
    let handle = fleet::spawn(backend, test_config())
        .await
        .expect("reconciler spawns");
    handle.resync().await.expect("initial sync");
    handle
}

/// Drains whatever events are buffered right now.
pub fn drain(rx: &mut broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("completed in time")
}
