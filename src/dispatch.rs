//! The process-wide event loop: receive, decode, plan, apply, annotate.
//!
//! Every failure is contained within the single message that caused it.
//! The receive loop itself only ends on shutdown; a dead consumer stream
//! triggers reconnection with exponential backoff.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::BusListener;
use crate::cache::{AddressCache, CachedInstance};
use crate::compute::{resolve_instance_by_address, ComputeApi};
use crate::config::BusConfig;
use crate::error::{DecodeError, PipelineError, SyncError};
use crate::event::{decode, LifecycleEvent};
use crate::metrics::{self, EventOutcome, ReconnectReason, Timer};
use crate::plan::{plan, InstanceAnnotation, ZoneLayout};
use crate::update::UpdateExecutor;

const MAX_BACKOFF_SECS: u64 = 30;

/// How a single message left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// DNS mutations were applied.
    Applied,
    /// The event required no mutation (disassociation, resolver miss).
    Skipped,
}

/// Routes decoded events through the planner, executor, and annotator.
///
/// Owns the control-plane session and the address cache for its lifetime;
/// one message is handled to completion before the next is dequeued, which
/// preserves per-hostname ordering without any locking.
pub struct Dispatcher {
    compute: Arc<dyn ComputeApi>,
    executor: UpdateExecutor,
    cache: AddressCache,
    zones: ZoneLayout,
}

impl Dispatcher {
    /// Create a dispatcher over the given collaborators.
    pub fn new(compute: Arc<dyn ComputeApi>, executor: UpdateExecutor, zones: ZoneLayout) -> Self {
        Self {
            compute,
            executor,
            cache: AddressCache::new(),
            zones,
        }
    }

    /// The address cache warmed from create events.
    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    /// Consume bus deliveries until shutdown.
    ///
    /// The first connection failure propagates (startup is fatal); once
    /// connected, stream death reconnects with backoff instead.
    pub async fn run(&self, bus: &BusConfig, shutdown: CancellationToken) -> Result<(), SyncError> {
        let mut listener = BusListener::connect(bus).await?;
        metrics::record_bus_reconnect(ReconnectReason::InitialConnect);
        info!("listening for lifecycle notifications");

        let mut backoff_secs = 1u64;

        loop {
            let delivery = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("dispatcher shutting down");
                    break;
                }

                delivery = listener.next() => delivery,
            };

            match delivery {
                Some(Ok(body)) => {
                    backoff_secs = 1;
                    self.process(&body).await;
                }
                Some(Err(e)) => {
                    warn!("bus consumer error: {e}");
                    metrics::record_bus_reconnect(ReconnectReason::Error);
                    match self.reconnect(bus, &shutdown, &mut backoff_secs).await {
                        Some(fresh) => listener = fresh,
                        None => break,
                    }
                }
                None => {
                    warn!("bus consumer stream ended");
                    metrics::record_bus_reconnect(ReconnectReason::StreamEnded);
                    match self.reconnect(bus, &shutdown, &mut backoff_secs).await {
                        Some(fresh) => listener = fresh,
                        None => break,
                    }
                }
            }
        }

        listener.close().await;
        Ok(())
    }

    /// Reconnect with exponential backoff. `None` means shutdown won.
    async fn reconnect(
        &self,
        bus: &BusConfig,
        shutdown: &CancellationToken,
        backoff_secs: &mut u64,
    ) -> Option<BusListener> {
        // Events may have been missed while disconnected, so cached
        // address mappings can no longer be trusted.
        self.cache.clear();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = sleep(Duration::from_secs(*backoff_secs)) => {}
            }
            *backoff_secs = (*backoff_secs * 2).min(MAX_BACKOFF_SECS);

            match BusListener::connect(bus).await {
                Ok(listener) => {
                    *backoff_secs = 1;
                    return Some(listener);
                }
                Err(e) => {
                    error!("failed to reconnect to message bus: {e}");
                    metrics::record_bus_reconnect(ReconnectReason::Error);
                }
            }
        }
    }

    /// Handle one delivery, containing every failure within this message.
    async fn process(&self, body: &[u8]) {
        let timer = Timer::start();

        match self.handle_envelope(body).await {
            Ok(Outcome::Applied) => {
                metrics::record_event_handled(EventOutcome::Applied, timer.elapsed());
            }
            Ok(Outcome::Skipped) => {
                metrics::record_event_handled(EventOutcome::Skipped, timer.elapsed());
            }
            Err(PipelineError::Decode(DecodeError::UnknownEventType(event_type))) => {
                debug!(event_type, "ignoring unrecognized event type");
                metrics::record_event_handled(EventOutcome::Ignored, timer.elapsed());
            }
            Err(PipelineError::Decode(e)) => {
                warn!("dropping undecodable notification: {e}");
                metrics::record_event_handled(EventOutcome::DecodeError, timer.elapsed());
            }
            Err(PipelineError::Resolve(e)) => {
                warn!("dropping event, control plane lookup failed: {e}");
                metrics::record_event_handled(EventOutcome::ResolveError, timer.elapsed());
            }
            Err(PipelineError::Update(e)) => {
                error!("DNS update failed, dropping event: {e}");
                metrics::record_event_handled(EventOutcome::UpdateError, timer.elapsed());
            }
        }
    }

    /// The full pipeline for one raw envelope: decode, resolve, plan,
    /// apply, annotate. Public so integration tests can drive it directly.
    pub async fn handle_envelope(&self, body: &[u8]) -> Result<Outcome, PipelineError> {
        let event = decode(body)?;
        debug!(
            kind = event.kind(),
            project = %event.project().name,
            "decoded lifecycle event"
        );

        let resolved = match &event {
            LifecycleEvent::FloatingIpAssociated {
                project,
                associated_internal_address: Some(address),
                ..
            } => {
                let instance = resolve_instance_by_address(
                    self.compute.as_ref(),
                    &self.cache,
                    *address,
                    &project.id,
                )
                .await?;
                if instance.is_none() {
                    // Expected race: the instance can be gone by the time
                    // the notification is processed.
                    debug!(%address, project_id = %project.id, "no instance owns address, skipping");
                }
                instance
            }
            _ => None,
        };

        let planned = plan(&event, resolved.as_ref(), &self.zones);
        self.maintain_cache(&event);

        if planned.intents.is_empty() {
            if let LifecycleEvent::FloatingIpAssociated {
                floating_address,
                associated_internal_address: None,
                ..
            } = &event
            {
                info!(%floating_address, "floating ip disassociated, leaving records in place");
            }
            return Ok(Outcome::Skipped);
        }

        info!(
            kind = event.kind(),
            directives = planned.intents.len(),
            "applying DNS update"
        );
        self.executor.apply(&planned.intents).await?;

        if let Some(annotation) = &planned.annotation {
            self.annotate(annotation).await;
        }

        Ok(Outcome::Applied)
    }

    /// Keep the address cache in step with create/delete events.
    fn maintain_cache(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::InstanceCreated {
                project,
                hostname,
                instance_id,
                internal_address,
                ..
            } => {
                self.cache.insert(
                    &project.id,
                    *internal_address,
                    CachedInstance {
                        id: instance_id.clone(),
                        hostname: hostname.clone(),
                    },
                );
            }
            LifecycleEvent::InstanceDeleted { project, hostname } => {
                self.cache.remove_hostname(&project.id, hostname);
            }
            LifecycleEvent::FloatingIpAssociated { .. } => {}
        }
    }

    /// Best-effort metadata write-back; failures are logged and dropped.
    async fn annotate(&self, annotation: &InstanceAnnotation) {
        // The create notification can outlive the instance; confirm it
        // still exists before tagging it.
        if let Err(e) = self.compute.get_instance(&annotation.instance_id).await {
            warn!(
                instance_id = %annotation.instance_id,
                "instance not found for annotation, skipping: {e}"
            );
            metrics::record_annotation(false);
            return;
        }

        for (key, value) in annotation.pairs() {
            match self
                .compute
                .set_metadata_item(&annotation.instance_id, key, value)
                .await
            {
                Ok(()) => metrics::record_annotation(true),
                Err(e) => {
                    warn!(
                        instance_id = %annotation.instance_id,
                        key,
                        "failed to write instance metadata: {e}"
                    );
                    metrics::record_annotation(false);
                }
            }
        }
    }
}
