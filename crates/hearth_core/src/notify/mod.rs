//! Change notification: listener fanout plus an ambient broadcast bus.

pub mod bus;
pub mod notifier;

pub use bus::{ChangeBroadcast, ChangeBus};
pub use notifier::{Listener, Notifier, Subscription};
