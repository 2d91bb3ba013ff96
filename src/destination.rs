//! Control surface for destination resources.

use std::fmt;

use crate::entity::DestinationRef;
use crate::remote::RemoteFuture;

/// Power state of a destination resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PowerState {
    /// Running.
    On,
    /// Deployed but stopped.
    Off,
    /// No resource is deployed at the destination.
    NotDeployed,
}

impl PowerState {
    /// Returns a lower-case label for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::NotDeployed => "not deployed",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Remote operations on destination resources.
pub trait DestinationControl: Send + Sync {
    /// Reads the current power state.
    fn power_state<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, PowerState>;

    /// Powers the destination on.
    fn power_on<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, ()>;

    /// Powers the destination off.
    fn power_off<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, ()>;

    /// Reloads cached metadata such as network identity and disks.
    fn refresh_metadata<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, ()>;

    /// Reports whether a live resource exists for the destination.
    fn exists<'a>(&'a self, destination: &'a DestinationRef) -> RemoteFuture<'a, bool>;
}
