//! Dense identifiers for channels and chain states.
//!
//! The catalog is an arena: channel names and history states are interned
//! once and referred to by integer ids afterwards, so the simulation never
//! compares strings.
//!
//! # State Layout
//!
//! | id  | state |
//! |-----|-------|
//! | 0   | `(start)` |
//! | 1   | `(conversion)` |
//! | 2   | `(null)` |
//! | 3.. | history states, in order of first composition |
//!
//! A history state is the sequence of the last *k* channels visited (fewer at
//! the beginning of a path). For order 1 every history is a single channel.

use std::{collections::HashMap, fmt};

use serde::Serialize;

use crate::ValidationError;

/// Dense index of a channel name within one catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Dense index of a chain state within one catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StateId(pub(crate) usize);

impl StateId {
    pub const START: Self = Self(0);
    pub const CONVERSION: Self = Self(1);
    pub const NULL: Self = Self(2);

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    #[must_use]
    pub const fn is_absorbing(self) -> bool {
        self.0 == Self::CONVERSION.0 || self.0 == Self::NULL.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum ControlState {
    Start,
    Conversion,
    Null,
}

impl ControlState {
    const ALL: [Self; 3] = [Self::Start, Self::Conversion, Self::Null];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Start => "(start)",
            Self::Conversion => "(conversion)",
            Self::Null => "(null)",
        }
    }
}

#[derive(Debug, Clone)]
enum StateKind {
    Control(ControlState),
    History(Box<[ChannelId]>),
}

#[derive(Debug, Clone)]
pub struct StateCatalog {
    order: usize,
    channel_names: Vec<String>,
    channel_ids: HashMap<String, ChannelId>,
    states: Vec<StateKind>,
    history_ids: HashMap<Box<[ChannelId]>, StateId>,
}

impl StateCatalog {
    /// Creates an empty catalog for a chain of the given order.
    pub fn new(order: usize) -> Result<Self, ValidationError> {
        if order < 1 {
            return Err(ValidationError::InvalidOrder { order });
        }
        Ok(Self {
            order,
            channel_names: vec![],
            channel_ids: HashMap::new(),
            states: ControlState::ALL.map(StateKind::Control).to_vec(),
            history_ids: HashMap::new(),
        })
    }

    #[must_use]
    pub fn order(&self) -> usize {
        self.order
    }

    #[must_use]
    pub fn control(kind: ControlState) -> StateId {
        match kind {
            ControlState::Start => StateId::START,
            ControlState::Conversion => StateId::CONVERSION,
            ControlState::Null => StateId::NULL,
        }
    }

    /// Interns a channel token, returning the same id for the same token.
    ///
    /// Surrounding whitespace is not part of the channel name. `path_index`
    /// and `position` only feed the error.
    pub fn resolve(
        &mut self,
        token: &str,
        path_index: usize,
        position: usize,
    ) -> Result<ChannelId, ValidationError> {
        let name = token.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyChannel {
                path_index,
                position,
            });
        }
        if let Some(&id) = self.channel_ids.get(name) {
            return Ok(id);
        }
        let id = ChannelId(self.channel_names.len());
        self.channel_names.push(name.to_owned());
        self.channel_ids.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Maps a channel history to its state, interning it on first use.
    ///
    /// Only the last `order` entries of `history` are significant.
    ///
    /// # Panics
    ///
    /// Panics if `history` is empty.
    pub fn compose(&mut self, history: &[ChannelId]) -> StateId {
        assert!(!history.is_empty(), "history must not be empty");
        let history = &history[history.len().saturating_sub(self.order)..];
        if let Some(&id) = self.history_ids.get(history) {
            return id;
        }
        let id = StateId(self.states.len());
        let key: Box<[ChannelId]> = history.into();
        self.states.push(StateKind::History(key.clone()));
        self.history_ids.insert(key, id);
        id
    }

    #[must_use]
    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.channel_ids.get(name.trim()).copied()
    }

    #[must_use]
    pub fn channel_name(&self, channel: ChannelId) -> &str {
        &self.channel_names[channel.0]
    }

    /// Returns all channels in order of first appearance.
    pub fn channels(&self) -> impl ExactSizeIterator<Item = ChannelId> + '_ {
        (0..self.channel_names.len()).map(ChannelId)
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Returns the single-channel state of `channel`, if one was composed.
    #[must_use]
    pub fn channel_state(&self, channel: ChannelId) -> Option<StateId> {
        self.history_ids.get([channel].as_slice()).copied()
    }

    /// Returns the channel history of a state, or `None` for control states.
    #[must_use]
    pub fn history(&self, state: StateId) -> Option<&[ChannelId]> {
        match &self.states[state.0] {
            StateKind::Control(_) => None,
            StateKind::History(history) => Some(history),
        }
    }

    /// Returns whether entering `state` means `channel` has been visited.
    #[must_use]
    pub fn involves(&self, state: StateId, channel: ChannelId) -> bool {
        self.history(state)
            .is_some_and(|history| history.contains(&channel))
    }

    /// Human-readable state name; composite histories are joined with `,`.
    #[must_use]
    pub fn label(&self, state: StateId) -> String {
        match &self.states[state.0] {
            StateKind::Control(kind) => kind.label().to_owned(),
            StateKind::History(history) => history
                .iter()
                .map(|&c| self.channel_name(c))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}
