//! Shared test infrastructure: a recording DNS transport, an in-memory
//! compute API, and notification envelope builders.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lifecycle_dns::compute::{ComputeApi, InstanceRef};
use lifecycle_dns::error::{ComputeError, UpdateError};
use lifecycle_dns::plan::ZoneLayout;
use lifecycle_dns::update::{DnsTransport, UpdateExecutor};
use lifecycle_dns::Dispatcher;

pub const NAMESERVER: &str = "ns.test";

/// Records every transaction instead of reaching a name server.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    transactions: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transactions(&self) -> Vec<String> {
        self.transactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl DnsTransport for RecordingTransport {
    async fn apply_transaction(&self, transaction: &str) -> Result<(), UpdateError> {
        self.transactions
            .lock()
            .unwrap()
            .push(transaction.to_string());
        Ok(())
    }
}

/// In-memory compute API with scripted instances and recorded metadata
/// writes.
#[derive(Clone, Default)]
pub struct FakeComputeApi {
    instances: Arc<Mutex<Vec<InstanceRef>>>,
    metadata: Arc<Mutex<Vec<(String, String, String)>>>,
    list_calls: Arc<AtomicUsize>,
}

impl FakeComputeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&self, instance: InstanceRef) {
        self.instances.lock().unwrap().push(instance);
    }

    pub fn remove_instance(&self, id: &str) {
        self.instances.lock().unwrap().retain(|i| i.id != id);
    }

    /// Recorded (instance_id, key, value) metadata writes, in order.
    pub fn metadata_writes(&self) -> Vec<(String, String, String)> {
        self.metadata.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeApi for FakeComputeApi {
    async fn list_instances(&self, _all_tenants: bool) -> Result<Vec<InstanceRef>, ComputeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn get_instance(&self, id: &str) -> Result<InstanceRef, ComputeError> {
        self.instances
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(ComputeError::Api {
                operation: "get server",
                status: 404,
            })
    }

    async fn set_metadata_item(
        &self,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ComputeError> {
        self.metadata
            .lock()
            .unwrap()
            .push((id.to_string(), key.to_string(), value.to_string()));
        Ok(())
    }
}

/// An instance with the given addresses on one private network.
pub fn instance(id: &str, name: &str, tenant: &str, addrs: &[&str]) -> InstanceRef {
    let mut networks = HashMap::new();
    networks.insert(
        "private".to_string(),
        addrs.iter().map(|a| a.parse().unwrap()).collect(),
    );
    InstanceRef {
        id: id.to_string(),
        name: name.to_string(),
        tenant_id: tenant.to_string(),
        networks,
    }
}

pub fn zones() -> ZoneLayout {
    ZoneLayout {
        internal_domain: "internal".to_string(),
        external_domain: "external".to_string(),
        ttl: 1,
    }
}

/// A dispatcher wired to fakes, returning handles to both.
pub fn dispatcher(compute: FakeComputeApi) -> (Dispatcher, RecordingTransport) {
    let transport = RecordingTransport::new();
    let executor = UpdateExecutor::new(NAMESERVER, Arc::new(transport.clone()));
    let dispatcher = Dispatcher::new(Arc::new(compute), executor, zones());
    (dispatcher, transport)
}

// --- Envelope builders ---

/// Wrap a notification in the bus envelope format.
pub fn envelope(notification: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({ "oslo.message": notification.to_string() })).unwrap()
}

pub fn created_notification(
    hostname: &str,
    project: &str,
    project_id: &str,
    instance_id: &str,
    address: &str,
) -> Value {
    json!({
        "event_type": "compute.instance.create.end",
        "_context_project_name": project,
        "_context_project_id": project_id,
        "_context_user_name": "alice",
        "_context_user_id": "u1",
        "payload": {
            "hostname": hostname,
            "instance_id": instance_id,
            "fixed_ips": [{ "address": address }],
        },
    })
}

pub fn deleted_notification(hostname: &str, project: &str, project_id: &str) -> Value {
    json!({
        "event_type": "compute.instance.delete.start",
        "_context_project_name": project,
        "_context_project_id": project_id,
        "payload": { "hostname": hostname },
    })
}

pub fn floating_notification(
    project: &str,
    project_id: &str,
    floating: &str,
    fixed: Option<&str>,
) -> Value {
    json!({
        "event_type": "floatingip.update.end",
        "_context_project_name": project,
        "_context_project_id": project_id,
        "payload": {
            "floatingip": {
                "floating_ip_address": floating,
                "fixed_ip_address": fixed,
            },
        },
    })
}
