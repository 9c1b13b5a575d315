//! Serialization and transmission of name-server update transactions.
//!
//! An ordered intent batch is rendered as one nsupdate session: a `server`
//! directive, the delete/add directives in intent order, and a terminating
//! `send`. The protocol applies directives in order within a session and
//! transmits the session as a single unit, which is what makes the
//! delete-before-add invariant effective.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::UpdateError;
use crate::metrics::{self, UpdateResult};
use crate::plan::{DnsMutationIntent, DnsOp};

/// Render an ordered intent batch as one nsupdate transaction.
pub fn render_transaction(nameserver: &str, intents: &[DnsMutationIntent]) -> String {
    let mut text = format!("server {nameserver}\n");

    for intent in intents {
        match intent.op {
            DnsOp::Delete => {
                text.push_str(&format!("update delete {}. A\n", intent.fqdn));
            }
            DnsOp::Add => {
                // The planner puts an address on every add.
                if let Some(address) = intent.address {
                    text.push_str(&format!(
                        "update add {}. {} A {address}\n",
                        intent.fqdn, intent.ttl
                    ));
                }
            }
        }
    }

    text.push_str("send\n");
    text
}

/// Transport that delivers a rendered update transaction to a name server.
#[async_trait]
pub trait DnsTransport: Send + Sync {
    /// Transmit one transaction as a single unit.
    async fn apply_transaction(&self, transaction: &str) -> Result<(), UpdateError>;
}

/// Transport that feeds transactions to the `nsupdate` utility over stdin.
#[derive(Debug, Clone)]
pub struct NsupdateTransport {
    command: PathBuf,
}

impl NsupdateTransport {
    /// Create a transport invoking the given nsupdate binary.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl DnsTransport for NsupdateTransport {
    async fn apply_transaction(&self, transaction: &str) -> Result<(), UpdateError> {
        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(UpdateError::TransportFailure)?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            UpdateError::TransportFailure(std::io::Error::other("nsupdate stdin unavailable"))
        })?;
        stdin
            .write_all(transaction.as_bytes())
            .await
            .map_err(UpdateError::TransportFailure)?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(UpdateError::TransportFailure)?;

        if !output.status.success() {
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(UpdateError::RejectedByServer { detail });
        }

        Ok(())
    }
}

/// Applies planned mutation batches against the configured name server.
///
/// No retry policy lives here: a failed batch is reported and dropped,
/// because blindly replaying a delete/add batch risks reordering it behind
/// newer events for the same hostname.
pub struct UpdateExecutor {
    nameserver: String,
    transport: Arc<dyn DnsTransport>,
}

impl UpdateExecutor {
    /// Create an executor targeting `nameserver` through `transport`.
    pub fn new(nameserver: impl Into<String>, transport: Arc<dyn DnsTransport>) -> Self {
        Self {
            nameserver: nameserver.into(),
            transport,
        }
    }

    /// Apply one ordered batch as a single transaction.
    ///
    /// An empty batch is a no-op that never touches the transport.
    /// Re-applying the same batch yields the same final record set, since
    /// deletes precede adds and deleting a non-existent record is a no-op.
    pub async fn apply(&self, intents: &[DnsMutationIntent]) -> Result<(), UpdateError> {
        if intents.is_empty() {
            return Ok(());
        }

        let transaction = render_transaction(&self.nameserver, intents);
        debug!(directives = intents.len(), "transmitting update transaction");

        let result = self.transport.apply_transaction(&transaction).await;
        metrics::record_update(match &result {
            Ok(()) => UpdateResult::Applied,
            Err(UpdateError::TransportFailure(_)) => UpdateResult::TransportFailure,
            Err(UpdateError::RejectedByServer { .. }) => UpdateResult::Rejected,
        });

        result
    }
}
