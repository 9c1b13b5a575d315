//! Decoding of raw bus envelopes into typed lifecycle events.
//!
//! Notifications arrive as a JSON envelope with the actual notification
//! serialized as a string under the `oslo.message` key. The inner payload
//! carries an `event_type` discriminator, request-context fields, and an
//! event-specific `payload` object.

use serde::Deserialize;
use std::net::Ipv4Addr;

use crate::error::DecodeError;

/// Event type emitted when an instance finishes creation.
pub const EVENT_INSTANCE_CREATE: &str = "compute.instance.create.end";
/// Event type emitted when an instance starts deletion.
pub const EVENT_INSTANCE_DELETE: &str = "compute.instance.delete.start";
/// Event type emitted when a floating IP association changes.
pub const EVENT_FLOATING_IP_UPDATE: &str = "floatingip.update.end";

/// Project that emitted a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContext {
    /// Human-readable project name (used in FQDNs).
    pub name: String,
    /// Project (tenant) identifier.
    pub id: String,
}

/// User that triggered a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// Human-readable user name.
    pub name: String,
    /// User identifier.
    pub id: String,
}

/// A decoded lifecycle notification.
///
/// Exactly one variant per recognized event type; fields each variant
/// requires are present by construction, so downstream planning never
/// needs to guess at defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// An instance finished creation and has its first fixed address.
    InstanceCreated {
        /// Owning project.
        project: ProjectContext,
        /// User that created the instance.
        user: UserContext,
        /// Instance hostname (used as the FQDN leaf).
        hostname: String,
        /// Instance identifier in the control plane.
        instance_id: String,
        /// First fixed IPv4 address assigned to the instance.
        internal_address: Ipv4Addr,
    },

    /// An instance started deletion.
    InstanceDeleted {
        /// Owning project.
        project: ProjectContext,
        /// Instance hostname.
        hostname: String,
    },

    /// A floating IP was associated with (or detached from) a fixed address.
    FloatingIpAssociated {
        /// Owning project.
        project: ProjectContext,
        /// The publicly routable address.
        floating_address: Ipv4Addr,
        /// The fixed address the floating IP now points at.
        /// `None` signals a disassociation, which produces no mutation.
        associated_internal_address: Option<Ipv4Addr>,
    },
}

impl LifecycleEvent {
    /// Short stable name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::InstanceCreated { .. } => "instance_created",
            LifecycleEvent::InstanceDeleted { .. } => "instance_deleted",
            LifecycleEvent::FloatingIpAssociated { .. } => "floating_ip_associated",
        }
    }

    /// The project context every event carries.
    pub fn project(&self) -> &ProjectContext {
        match self {
            LifecycleEvent::InstanceCreated { project, .. } => project,
            LifecycleEvent::InstanceDeleted { project, .. } => project,
            LifecycleEvent::FloatingIpAssociated { project, .. } => project,
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "oslo.message")]
    message: String,
}

#[derive(Deserialize)]
struct RawNotification {
    event_type: String,
    #[serde(rename = "_context_project_name")]
    project_name: Option<String>,
    #[serde(rename = "_context_project_id")]
    project_id: Option<String>,
    #[serde(rename = "_context_user_name")]
    user_name: Option<String>,
    #[serde(rename = "_context_user_id")]
    user_id: Option<String>,
    #[serde(default)]
    payload: RawPayload,
}

#[derive(Deserialize, Default)]
struct RawPayload {
    hostname: Option<String>,
    instance_id: Option<String>,
    fixed_ips: Option<Vec<RawFixedIp>>,
    floatingip: Option<RawFloatingIp>,
}

#[derive(Deserialize)]
struct RawFixedIp {
    address: String,
}

#[derive(Deserialize)]
struct RawFloatingIp {
    floating_ip_address: Option<String>,
    fixed_ip_address: Option<String>,
}

fn parse_address(raw: &str) -> Result<Ipv4Addr, DecodeError> {
    raw.trim()
        .parse()
        .map_err(|source| DecodeError::InvalidAddress {
            address: raw.to_string(),
            source,
        })
}

/// Decode a raw bus envelope into a typed lifecycle event.
///
/// Unknown event types yield [`DecodeError::UnknownEventType`]; missing
/// required fields yield [`DecodeError::MissingField`]. No side effects.
pub fn decode(raw: &[u8]) -> Result<LifecycleEvent, DecodeError> {
    let envelope: RawEnvelope = serde_json::from_slice(raw).map_err(DecodeError::Envelope)?;
    let notification: RawNotification =
        serde_json::from_str(&envelope.message).map_err(DecodeError::Payload)?;

    let RawNotification {
        event_type,
        project_name,
        project_id,
        user_name,
        user_id,
        payload,
    } = notification;

    let project = ProjectContext {
        name: project_name.ok_or(DecodeError::MissingField("_context_project_name"))?,
        id: project_id.ok_or(DecodeError::MissingField("_context_project_id"))?,
    };

    match event_type.as_str() {
        EVENT_INSTANCE_CREATE => {
            let hostname = payload
                .hostname
                .ok_or(DecodeError::MissingField("hostname"))?;
            let instance_id = payload
                .instance_id
                .ok_or(DecodeError::MissingField("instance_id"))?;
            let fixed_ip = payload
                .fixed_ips
                .unwrap_or_default()
                .into_iter()
                .next()
                .ok_or(DecodeError::MissingField("fixed_ips"))?;
            let user = UserContext {
                name: user_name.ok_or(DecodeError::MissingField("_context_user_name"))?,
                id: user_id.ok_or(DecodeError::MissingField("_context_user_id"))?,
            };

            Ok(LifecycleEvent::InstanceCreated {
                project,
                user,
                hostname,
                instance_id,
                internal_address: parse_address(&fixed_ip.address)?,
            })
        }
        EVENT_INSTANCE_DELETE => {
            let hostname = payload
                .hostname
                .ok_or(DecodeError::MissingField("hostname"))?;

            Ok(LifecycleEvent::InstanceDeleted { project, hostname })
        }
        EVENT_FLOATING_IP_UPDATE => {
            let floatingip = payload
                .floatingip
                .ok_or(DecodeError::MissingField("floatingip"))?;
            let floating_address = floatingip
                .floating_ip_address
                .ok_or(DecodeError::MissingField("floating_ip_address"))?;
            let associated_internal_address = match floatingip.fixed_ip_address {
                Some(fixed) => Some(parse_address(&fixed)?),
                None => None,
            };

            Ok(LifecycleEvent::FloatingIpAssociated {
                project,
                floating_address: parse_address(&floating_address)?,
                associated_internal_address,
            })
        }
        _ => Err(DecodeError::UnknownEventType(event_type)),
    }
}
