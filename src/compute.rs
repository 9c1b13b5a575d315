//! Control-plane collaborator: compute API client and address resolution.
//!
//! The compute API is abstracted behind [`ComputeApi`] so the pipeline can
//! be exercised against an in-memory fake. The production implementation
//! speaks the Keystone v3 / Nova HTTP APIs over reqwest.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::AddressCache;
use crate::config::CloudConfig;
use crate::error::ComputeError;

/// An instance as seen through the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    /// Instance identifier.
    pub id: String,
    /// Instance name (used as the DNS hostname).
    pub name: String,
    /// Owning project (tenant) id.
    pub tenant_id: String,
    /// Network name to attached addresses.
    pub networks: HashMap<String, Vec<IpAddr>>,
}

impl InstanceRef {
    /// Whether any attached network carries the given address.
    pub fn has_address(&self, address: IpAddr) -> bool {
        self.networks.values().any(|addrs| addrs.contains(&address))
    }
}

/// The control-plane operations this service depends on.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// List instances, optionally across all tenants.
    async fn list_instances(&self, all_tenants: bool) -> Result<Vec<InstanceRef>, ComputeError>;

    /// Fetch a single instance by id.
    async fn get_instance(&self, id: &str) -> Result<InstanceRef, ComputeError>;

    /// Write one metadata key/value onto an instance.
    async fn set_metadata_item(
        &self,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ComputeError>;
}

/// Find the instance that owns `address` within `project_id`.
///
/// The cache is consulted first; a hit is re-validated with a direct get so
/// a stale mapping can never produce a wrong answer. Otherwise this is a
/// cross-tenant scan filtered by project id and then by address membership,
/// as the floating-IP notification does not identify the instance.
///
/// `Ok(None)` means no instance owns the address, which is an expected race
/// (the instance may be gone by the time the notification is processed),
/// not an error.
pub async fn resolve_instance_by_address(
    api: &dyn ComputeApi,
    cache: &AddressCache,
    address: Ipv4Addr,
    project_id: &str,
) -> Result<Option<InstanceRef>, ComputeError> {
    if let Some(hit) = cache.lookup(project_id, address) {
        match api.get_instance(&hit.id).await {
            Ok(instance) => {
                debug!(%address, project_id, instance = %instance.name, "address resolved from cache");
                return Ok(Some(instance));
            }
            Err(e) => {
                debug!(%address, project_id, "cached instance no longer fetchable, falling back to scan: {e}");
                cache.remove(project_id, address);
            }
        }
    }

    let target = IpAddr::V4(address);
    for instance in api.list_instances(true).await? {
        if instance.tenant_id != project_id {
            continue;
        }
        if instance.has_address(target) {
            debug!(%address, project_id, instance = %instance.name, "address resolved by scan");
            return Ok(Some(instance));
        }
    }

    Ok(None)
}

/// Nova-style compute client with Keystone v3 password authentication.
///
/// The token is obtained once at startup (failure there is fatal) and
/// refreshed transparently when a request comes back unauthorized.
pub struct NovaComputeClient {
    http: reqwest::Client,
    config: CloudConfig,
    token: RwLock<Option<String>>,
}

impl NovaComputeClient {
    /// Authenticate against the identity service and return a ready client.
    pub async fn connect(config: CloudConfig) -> Result<Self, ComputeError> {
        let client = Self {
            http: reqwest::Client::new(),
            config,
            token: RwLock::new(None),
        };

        let token = client.authenticate().await?;
        *client.token.write().await = Some(token);
        info!(auth_url = %client.config.auth_url, "authenticated with the identity service");

        Ok(client)
    }

    async fn authenticate(&self) -> Result<String, ComputeError> {
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": { "name": self.config.user_domain },
                            "password": self.config.password,
                        },
                    },
                },
                "scope": {
                    "project": {
                        "name": self.config.project_name,
                        "domain": { "name": self.config.project_domain },
                    },
                },
            },
        });

        let url = format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        let response = self.http.post(url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(ComputeError::AuthRejected(response.status().to_string()));
        }

        response
            .headers()
            .get("x-subject-token")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| ComputeError::AuthRejected("token header missing".to_string()))
    }

    fn compute_url(&self) -> &str {
        self.config.compute_url.trim_end_matches('/')
    }

    /// Send an authenticated request, re-authenticating once on 401.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ComputeError> {
        let mut reauthenticated = false;

        loop {
            let token = {
                let guard = self.token.read().await;
                guard.clone()
            };
            let token = match token {
                Some(token) => token,
                None => {
                    let fresh = self.authenticate().await?;
                    *self.token.write().await = Some(fresh.clone());
                    fresh
                }
            };

            let mut request = self
                .http
                .request(method.clone(), url.as_str())
                .header("x-auth-token", &token);
            if let Some(ref body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            if response.status() == StatusCode::UNAUTHORIZED && !reauthenticated {
                debug!(operation, "token expired, re-authenticating");
                *self.token.write().await = None;
                reauthenticated = true;
                continue;
            }

            if !response.status().is_success() {
                return Err(ComputeError::Api {
                    operation,
                    status: response.status().as_u16(),
                });
            }

            return Ok(response);
        }
    }
}

#[async_trait]
impl ComputeApi for NovaComputeClient {
    async fn list_instances(&self, all_tenants: bool) -> Result<Vec<InstanceRef>, ComputeError> {
        let mut url = format!("{}/servers/detail", self.compute_url());
        if all_tenants {
            url.push_str("?all_tenants=1");
        }

        let list: ServerList = self
            .send("list servers", Method::GET, url, None)
            .await?
            .json()
            .await?;

        Ok(list.servers.into_iter().map(Into::into).collect())
    }

    async fn get_instance(&self, id: &str) -> Result<InstanceRef, ComputeError> {
        let url = format!("{}/servers/{id}", self.compute_url());

        let envelope: ServerEnvelope = self
            .send("get server", Method::GET, url, None)
            .await?
            .json()
            .await?;

        Ok(envelope.server.into())
    }

    async fn set_metadata_item(
        &self,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ComputeError> {
        let url = format!("{}/servers/{id}/metadata/{key}", self.compute_url());

        let mut meta = serde_json::Map::new();
        meta.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
        let body = json!({ "meta": meta });

        self.send("set server metadata", Method::PUT, url, Some(body))
            .await?;

        Ok(())
    }
}

#[derive(Deserialize)]
struct ServerList {
    servers: Vec<RawServer>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: RawServer,
}

#[derive(Deserialize)]
struct RawServer {
    id: String,
    name: String,
    tenant_id: String,
    #[serde(default)]
    addresses: HashMap<String, Vec<RawAddress>>,
}

#[derive(Deserialize)]
struct RawAddress {
    addr: String,
}

impl From<RawServer> for InstanceRef {
    fn from(raw: RawServer) -> Self {
        let networks = raw
            .addresses
            .into_iter()
            .map(|(network, addrs)| {
                let parsed = addrs
                    .into_iter()
                    .filter_map(|a| a.addr.parse().ok())
                    .collect();
                (network, parsed)
            })
            .collect();

        Self {
            id: raw.id,
            name: raw.name,
            tenant_id: raw.tenant_id,
            networks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedInstance;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn instance(id: &str, name: &str, tenant: &str, addrs: &[&str]) -> InstanceRef {
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

    #[derive(Default)]
    struct ScriptedApi {
        instances: Arc<Mutex<Vec<InstanceRef>>>,
        list_calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn with_instances(instances: Vec<InstanceRef>) -> Self {
            Self {
                instances: Arc::new(Mutex::new(instances)),
                list_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ComputeApi for ScriptedApi {
        async fn list_instances(
            &self,
            _all_tenants: bool,
        ) -> Result<Vec<InstanceRef>, ComputeError> {
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
            _id: &str,
            _key: &str,
            _value: &str,
        ) -> Result<(), ComputeError> {
            Ok(())
        }
    }

    #[test]
    fn test_has_address_scans_all_networks() {
        let mut networks = HashMap::new();
        networks.insert("a".to_string(), vec!["10.0.0.5".parse().unwrap()]);
        networks.insert("b".to_string(), vec!["10.0.1.7".parse().unwrap()]);
        let instance = InstanceRef {
            id: "i-1".to_string(),
            name: "web1".to_string(),
            tenant_id: "p1".to_string(),
            networks,
        };

        assert!(instance.has_address("10.0.1.7".parse().unwrap()));
        assert!(!instance.has_address("10.0.2.9".parse().unwrap()));
    }

    #[test]
    fn test_raw_server_conversion_skips_unparseable_addresses() {
        let raw = RawServer {
            id: "i-1".to_string(),
            name: "web1".to_string(),
            tenant_id: "p1".to_string(),
            addresses: HashMap::from([(
                "private".to_string(),
                vec![
                    RawAddress {
                        addr: "10.0.0.5".to_string(),
                    },
                    RawAddress {
                        addr: "garbage".to_string(),
                    },
                ],
            )]),
        };

        let converted = InstanceRef::from(raw);
        assert_eq!(converted.networks["private"].len(), 1);
    }

    #[tokio::test]
    async fn test_resolver_filters_by_project_then_address() {
        let api = ScriptedApi::with_instances(vec![
            instance("i-other", "other", "p2", &["10.0.0.5"]),
            instance("i-1", "web1", "p1", &["10.0.0.5"]),
        ]);
        let cache = AddressCache::new();

        let found =
            resolve_instance_by_address(&api, &cache, "10.0.0.5".parse().unwrap(), "p1")
                .await
                .unwrap()
                .expect("instance should resolve");

        assert_eq!(found.id, "i-1");
    }

    #[tokio::test]
    async fn test_resolver_miss_is_ok_none() {
        let api = ScriptedApi::with_instances(vec![instance("i-1", "web1", "p1", &["10.0.0.5"])]);
        let cache = AddressCache::new();

        let found =
            resolve_instance_by_address(&api, &cache, "10.0.0.99".parse().unwrap(), "p1")
                .await
                .unwrap();

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_resolver_prefers_cache_over_scan() {
        let api = ScriptedApi::with_instances(vec![instance("i-1", "web1", "p1", &["10.0.0.5"])]);
        let cache = AddressCache::new();
        cache.insert(
            "p1",
            "10.0.0.5".parse().unwrap(),
            CachedInstance {
                id: "i-1".to_string(),
                hostname: "web1".to_string(),
            },
        );

        let found =
            resolve_instance_by_address(&api, &cache, "10.0.0.5".parse().unwrap(), "p1")
                .await
                .unwrap()
                .expect("instance should resolve");

        assert_eq!(found.id, "i-1");
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_entry_falls_back_to_scan() {
        let api = ScriptedApi::with_instances(vec![instance("i-2", "web1", "p1", &["10.0.0.5"])]);
        let cache = AddressCache::new();
        cache.insert(
            "p1",
            "10.0.0.5".parse().unwrap(),
            CachedInstance {
                id: "i-gone".to_string(),
                hostname: "web1".to_string(),
            },
        );

        let found =
            resolve_instance_by_address(&api, &cache, "10.0.0.5".parse().unwrap(), "p1")
                .await
                .unwrap()
                .expect("instance should resolve via scan");

        assert_eq!(found.id, "i-2");
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
        // The stale entry must have been evicted.
        assert!(cache.lookup("p1", "10.0.0.5".parse().unwrap()).is_none());
    }
}
