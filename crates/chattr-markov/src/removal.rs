//! Views over the baseline transition index used by the simulation.
//!
//! A removal scenario never copies the index. It is a rule evaluated after
//! each sampling step: when the sampled destination involves the removed
//! channel, the walk is sent to `(null)` instead. For higher-order chains a
//! destination "involves" a channel if the channel is part of its history.

use crate::state::{ChannelId, StateCatalog, StateId};

/// Rewrites sampled destinations before a walk advances.
pub trait TransitionRule: Sync {
    fn redirect(&self, destination: StateId) -> StateId;
}

/// The unmodified model.
#[derive(Debug, Clone, Copy, Default)]
pub struct Baseline;

impl TransitionRule for Baseline {
    fn redirect(&self, destination: StateId) -> StateId {
        destination
    }
}

/// The model with every transition into one channel redirected to `(null)`.
#[derive(Debug, Clone, Copy)]
pub struct RemovalScenario<'a> {
    catalog: &'a StateCatalog,
    channel: ChannelId,
}

impl<'a> RemovalScenario<'a> {
    #[must_use]
    pub fn new(catalog: &'a StateCatalog, channel: ChannelId) -> Self {
        Self { catalog, channel }
    }

    #[must_use]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }
}

impl TransitionRule for RemovalScenario<'_> {
    fn redirect(&self, destination: StateId) -> StateId {
        if self.catalog.involves(destination, self.channel) {
            StateId::NULL
        } else {
            destination
        }
    }
}
