//! HTTP ingress and background runtime for Vendabot.
//!
//! - **Webhook** (`webhook`, `ingestion`) - signature check, split, store, enqueue
//! - **Workers** (`worker`, `processor`) - claim, run the orchestrator, settle
//! - **Scheduler** (`scheduler`) - session expiry and reminder sweeps
//! - **Health** (`health`) - `/health` readiness check

pub mod bootstrap;
pub mod health;
pub mod ingestion;
pub mod processor;
pub mod scheduler;
pub mod webhook;
pub mod worker;
