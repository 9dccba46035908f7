//! chirp — peer-to-peer service discovery on a shared broadcast domain.
//!
//! Peers in the same named group announce (OFFER), withdraw (LEAVING),
//! and solicit (REQUEST) typed services over fixed-size UDP broadcast
//! datagrams. There is no central registry: every peer runs a [`Manager`]
//! that maintains what it offers and what it has heard, and notifies the
//! application through discovery callbacks.

pub mod callback;
pub mod manager;
pub mod registry;
pub mod transport;

pub use callback::{DiscoverCallback, UserData};
pub use manager::Manager;
pub use registry::{DiscoveredService, RegisteredService};
