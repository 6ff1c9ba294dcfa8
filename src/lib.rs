//! Meridian - distributed game server cluster.
//!
//! One login process authenticates accounts and tracks realms, realm
//! processes broker client sessions and relay gameplay traffic, world
//! processes run the authoritative map simulations. Clients only ever talk
//! to a realm; everything behind it moves over the inter-node protocol in
//! [`proto`].

/// Map template catalog (read-only edge collaborator)
pub mod catalog;
/// Node configuration
pub mod config;
/// Lifecycle and signal handling
pub mod core;
/// World-side game state (objects, interest grid, instances)
pub mod game;
/// Framing, header cipher, reconnecting connector
pub mod network;
/// Inter-node message catalog
pub mod proto;
/// Server implementations (login, realm, world)
pub mod servers;
/// Account sessions and pending login requests
pub mod session;
/// Deferred-event timer queue
pub mod timer;
