//! Hub Daemon - Device registry, control router and live relay supervisor
//!
//! This crate provides the core infrastructure for the speaker-hub daemon:
//! - `registry` - Device session registry actor (who is connected, and how to reach them)
//! - `supervisor` - Live relay supervisor actor (at most one RTP relay per key)
//! - `router` - Control message delivery to one or all devices
//! - `coordinator` - Façade combining router and supervisor for API callers
//! - `server` - WebSocket endpoint devices connect to
//! - `api` - JSON HTTP bindings for the coordinator
//! - `net` - Host IPv4 addresses for `server_info`
//! - `rtp_debug` - Optional UDP listener that logs received RTP headers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            hubd                                  │
//! │                                                                  │
//! │  ┌───────────┐      ┌────────────────────┐                       │
//! │  │ ApiServer │─────▶│ SessionCoordinator │                       │
//! │  │  (axum)   │      └─────┬─────────┬────┘                       │
//! │  └───────────┘            │         │                            │
//! │                           ▼         ▼                            │
//! │                 ┌──────────────┐  ┌──────────────────┐           │
//! │                 │ ControlRouter│  │ SupervisorActor  │──▶ relays │
//! │                 └──────┬───────┘  │ (relay table)    │  (timer / │
//! │                        │          └──────────────────┘  child)   │
//! │                        ▼                                         │
//! │  ┌──────────────┐   ┌──────────────────┐                         │
//! │  │ DeviceServer │──▶│  RegistryActor   │                         │
//! │  │ (WebSocket)  │   │ (session table)  │                         │
//! │  └──────┬───────┘   └──────────────────┘                         │
//! │         │ per-connection outbound queue                          │
//! │         ▼                                                        │
//! │     devices                                                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod api;
pub mod config;
pub mod coordinator;
pub mod net;
pub mod registry;
pub mod router;
pub mod rtp_debug;
pub mod server;
pub mod supervisor;
