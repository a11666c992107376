use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::constants::{DEFAULT_FORMAT_VERSION, MAX_SLOTS};

/// A registered character. Names are unique, so equality is by name.
#[derive(Clone, Debug, Serialize)]
pub struct CharacterDefinition {
    pub name: String,
    #[serde(rename = "multiInstance")]
    pub multi_instance: bool,
    #[serde(rename = "formatVersion")]
    pub format_version: String,
    pub builtin: bool,
}

impl CharacterDefinition {
    pub fn new(name: impl Into<String>, multi_instance: bool, format_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multi_instance,
            format_version: format_version.into(),
            builtin: false,
        }
    }

    /// Host-owned character. Built-ins never exclude other selections.
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multi_instance: true,
            format_version: DEFAULT_FORMAT_VERSION.to_string(),
            builtin: true,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        !self.multi_instance
    }
}

impl PartialEq for CharacterDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CharacterDefinition {}

pub type CharacterHandle = Arc<CharacterDefinition>;

pub fn same_character(a: Option<&CharacterHandle>, b: Option<&CharacterHandle>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.name == b.name,
        _ => false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Disabled,
    Prepared,
    Enabled,
}

impl LifecycleState {
    /// The only state reachable in one step.
    pub fn next(self) -> Self {
        match self {
            Self::Disabled => Self::Prepared,
            Self::Prepared => Self::Enabled,
            Self::Enabled => Self::Disabled,
        }
    }

    pub fn phase(self) -> HookPhase {
        match self {
            Self::Disabled => HookPhase::Disable,
            Self::Prepared => HookPhase::Prepare,
            Self::Enabled => HookPhase::Enable,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Prepare,
    Enable,
    Disable,
    PlayerAdded,
    Save,
    Load,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player_{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SlotMask(pub u32);

impl SlotMask {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn first(count: usize) -> Self {
        let count = count.min(MAX_SLOTS);
        if count == MAX_SLOTS {
            return Self(u32::MAX);
        }
        Self((1u32 << count) - 1)
    }

    pub fn from_slots(slots: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::empty();
        for slot in slots {
            mask.insert(slot);
        }
        mask
    }

    pub fn insert(&mut self, slot: usize) {
        if slot < MAX_SLOTS {
            self.0 |= 1 << slot;
        }
    }

    pub fn contains(self, slot: usize) -> bool {
        slot < MAX_SLOTS && self.0 & (1 << slot) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_SLOTS).filter(move |slot| self.contains(*slot))
    }
}

/// Token the host uses to identify the character a player object was created for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawSelector {
    Index(u32),
    Name(String),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionContext {
    pub active_slots: SlotMask,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_states_cycle_one_step_at_a_time() {
        let mut state = LifecycleState::Disabled;
        let mut seen = Vec::new();
        for _ in 0..3 {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                LifecycleState::Prepared,
                LifecycleState::Enabled,
                LifecycleState::Disabled
            ]
        );
    }

    #[test]
    fn definitions_compare_by_name() {
        let a = CharacterDefinition::new("Rivulet", true, "1");
        let b = CharacterDefinition::new("Rivulet", false, "2");
        assert_eq!(a, b);
        assert!(same_character(Some(&Arc::new(a)), Some(&Arc::new(b))));
        assert!(!same_character(None, Some(&Arc::new(CharacterDefinition::builtin("Monk")))));
    }

    #[test]
    fn slot_mask_tracks_joined_slots() {
        let mask = SlotMask::from_slots([0, 2, 40]);
        assert!(mask.contains(0));
        assert!(!mask.contains(1));
        assert!(mask.contains(2));
        assert!(!mask.contains(40));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(SlotMask::first(3).iter().count(), 3);
        assert_eq!(SlotMask::first(MAX_SLOTS).iter().count(), MAX_SLOTS);
    }
}
