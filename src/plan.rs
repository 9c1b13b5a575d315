//! Translation of lifecycle events into ordered DNS mutation intents.
//!
//! This is the core of the system and it is deliberately pure: given an
//! event, an optionally resolved instance, and the zone layout, `plan`
//! deterministically produces the ordered mutation batch and the metadata
//! annotation implied by the event. All I/O lives elsewhere.

use std::net::Ipv4Addr;

use crate::compute::InstanceRef;
use crate::config::DnsUpdateConfig;
use crate::event::LifecycleEvent;

/// Zone naming and TTL parameters for planned records.
#[derive(Debug, Clone)]
pub struct ZoneLayout {
    /// Zone suffix for internal records.
    pub internal_domain: String,
    /// Zone suffix for public records.
    pub external_domain: String,
    /// TTL in seconds stamped on every added record.
    pub ttl: u32,
}

impl ZoneLayout {
    fn internal_fqdn(&self, hostname: &str, project: &str) -> String {
        format!("{hostname}.{project}.{}", self.internal_domain)
    }

    fn external_fqdn(&self, hostname: &str, project: &str) -> String {
        format!("{hostname}.{project}.{}", self.external_domain)
    }
}

impl From<&DnsUpdateConfig> for ZoneLayout {
    fn from(config: &DnsUpdateConfig) -> Self {
        Self {
            internal_domain: config.internal_domain.clone(),
            external_domain: config.external_domain.clone(),
            ttl: config.ttl,
        }
    }
}

/// The two operations the update protocol supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsOp {
    /// Retract every A record under the FQDN.
    Delete,
    /// Assert one A record under the FQDN.
    Add,
}

/// One ordered step of a DNS update transaction.
///
/// Within a batch, every `Delete` precedes every `Add`. Stale records must
/// never coexist with fresh ones; a brief window with no record is fine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMutationIntent {
    /// Delete or add.
    pub op: DnsOp,
    /// Fully qualified record name (without trailing dot).
    pub fqdn: String,
    /// Record address; always present for adds, never for deletes.
    pub address: Option<Ipv4Addr>,
    /// Record TTL in seconds.
    pub ttl: u32,
}

impl DnsMutationIntent {
    fn delete(fqdn: String, ttl: u32) -> Self {
        Self {
            op: DnsOp::Delete,
            fqdn,
            address: None,
            ttl,
        }
    }

    fn add(fqdn: String, address: Ipv4Addr, ttl: u32) -> Self {
        Self {
            op: DnsOp::Add,
            fqdn,
            address: Some(address),
            ttl,
        }
    }
}

/// Provenance metadata written back to the instance after a create.
///
/// Write-only and best-effort; no invariant beyond "attempted after a
/// successful create".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAnnotation {
    /// Instance the metadata is attached to.
    pub instance_id: String,
    /// Owning project name.
    pub project: String,
    /// Owning project id.
    pub project_id: String,
    /// Creating user name.
    pub user: String,
    /// Creating user id.
    pub user_id: String,
    /// Assigned fixed address.
    pub ip: String,
    /// Instance hostname.
    pub hostname: String,
}

impl InstanceAnnotation {
    /// The six key/value writes this annotation expands to.
    pub fn pairs(&self) -> [(&'static str, &str); 6] {
        [
            ("project", &self.project),
            ("project_id", &self.project_id),
            ("user", &self.user),
            ("user_id", &self.user_id),
            ("ip", &self.ip),
            ("hostname", &self.hostname),
        ]
    }
}

/// Output of planning one event.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Ordered mutation batch (deletes first).
    pub intents: Vec<DnsMutationIntent>,
    /// Metadata to attach to the instance, if any.
    pub annotation: Option<InstanceAnnotation>,
}

impl Plan {
    fn empty() -> Self {
        Self::default()
    }

    /// True when the event implies no work at all.
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty() && self.annotation.is_none()
    }
}

/// Compute the mutation batch and annotation implied by a lifecycle event.
///
/// `resolved` is the instance the address resolver found for floating-IP
/// events; `None` there means "skip, nothing to do" (the instance may have
/// been deleted before this notification was processed).
pub fn plan(
    event: &LifecycleEvent,
    resolved: Option<&InstanceRef>,
    zones: &ZoneLayout,
) -> Plan {
    match event {
        LifecycleEvent::InstanceCreated {
            project,
            user,
            hostname,
            instance_id,
            internal_address,
        } => Plan {
            intents: vec![
                DnsMutationIntent::delete(zones.internal_fqdn(hostname, &project.name), zones.ttl),
                DnsMutationIntent::delete(zones.external_fqdn(hostname, &project.name), zones.ttl),
                DnsMutationIntent::add(
                    zones.internal_fqdn(hostname, &project.name),
                    *internal_address,
                    zones.ttl,
                ),
            ],
            annotation: Some(InstanceAnnotation {
                instance_id: instance_id.clone(),
                project: project.name.clone(),
                project_id: project.id.clone(),
                user: user.name.clone(),
                user_id: user.id.clone(),
                ip: internal_address.to_string(),
                hostname: hostname.clone(),
            }),
        },

        LifecycleEvent::InstanceDeleted { project, hostname } => Plan {
            intents: vec![
                DnsMutationIntent::delete(zones.internal_fqdn(hostname, &project.name), zones.ttl),
                DnsMutationIntent::delete(zones.external_fqdn(hostname, &project.name), zones.ttl),
            ],
            annotation: None,
        },

        LifecycleEvent::FloatingIpAssociated {
            project,
            floating_address,
            associated_internal_address,
        } => {
            // A disassociation carries no fixed address and implies no
            // mutation; the caller logs it and moves on.
            let Some(fixed) = associated_internal_address else {
                return Plan::empty();
            };
            // No instance found for the address: expected race, skip.
            let Some(instance) = resolved else {
                return Plan::empty();
            };

            // The internal record written at create time is left in place.
            // The internal name must resolve the same whether or not a
            // floating IP exists.
            Plan {
                intents: vec![
                    DnsMutationIntent::add(
                        zones.external_fqdn(&instance.name, &project.name),
                        *floating_address,
                        zones.ttl,
                    ),
                    DnsMutationIntent::add(
                        zones.internal_fqdn(&instance.name, &project.name),
                        *fixed,
                        zones.ttl,
                    ),
                ],
                annotation: None,
            }
        }
    }
}
