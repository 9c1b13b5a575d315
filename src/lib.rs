//! lifecycle-dns - keeps a DNS zone in step with cloud instance lifecycles.
//!
//! This crate provides a reactive service that listens for instance
//! lifecycle notifications on a message bus, translates each one into an
//! ordered batch of DNS record mutations, and applies the batch against a
//! name server as a single delete-then-add update transaction. After a
//! successful create it also tags the instance with provenance metadata
//! (project, user, address, hostname).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         lifecycle-dns                            │
//! │                                                                  │
//! │  ┌───────────────┐   ┌─────────┐   ┌─────────┐   ┌───────────┐  │
//! │  │ Bus Listener  │──▶│ Decoder │──▶│ Planner │──▶│ Executor  │──┼─▶ nsupdate
//! │  │ (AMQP topics) │   └─────────┘   └────┬────┘   └───────────┘  │
//! │  └───────────────┘        │             │                       │
//! │                           ▼             ▼                       │
//! │                    ┌────────────┐  ┌────────────┐               │
//! │                    │  Resolver  │  │ Annotator  │               │
//! │                    │ (+ cache)  │  │ (metadata) │               │
//! │                    └─────┬──────┘  └─────┬──────┘               │
//! └──────────────────────────┼───────────────┼──────────────────────┘
//!                            ▼               ▼
//!                       compute API     compute API
//! ```
//!
//! ## Record layout
//!
//! ```text
//! instance create  →  delete web1.demo.internal / web1.demo.external,
//!                     add    web1.demo.internal = fixed ip
//! floating ip      →  add    web1.demo.external = floating ip,
//!                     add    web1.demo.internal = fixed ip
//! instance delete  →  delete both names
//! ```
//!
//! Every mutation batch is one update-protocol session; deletes always
//! precede adds, so replaying a batch converges to the same record set.
//! One bad message never aborts the receive loop.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use lifecycle_dns::compute::NovaComputeClient;
//! use lifecycle_dns::plan::ZoneLayout;
//! use lifecycle_dns::update::{NsupdateTransport, UpdateExecutor};
//! use lifecycle_dns::{Config, Dispatcher};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = load_config();
//!
//!     let compute = NovaComputeClient::connect(config.cloud.clone()).await.unwrap();
//!     let transport = Arc::new(NsupdateTransport::new(&config.dns.nsupdate_path));
//!     let executor = UpdateExecutor::new(config.dns.nameserver.clone(), transport);
//!
//!     let dispatcher = Dispatcher::new(
//!         Arc::new(compute),
//!         executor,
//!         ZoneLayout::from(&config.dns),
//!     );
//!     dispatcher.run(&config.bus, CancellationToken::new()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod bus;
pub mod cache;
pub mod compute;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod metrics;
pub mod plan;
pub mod telemetry;
pub mod update;

// Re-export main types
pub use config::{BusConfig, CloudConfig, Config, DnsUpdateConfig, TelemetryConfig};
pub use dispatch::{Dispatcher, Outcome};
pub use error::{ComputeError, DecodeError, PipelineError, SyncError, UpdateError};
pub use event::LifecycleEvent;
pub use plan::{plan, DnsMutationIntent, InstanceAnnotation, Plan, ZoneLayout};
