use std::collections::BTreeMap;

use tracing::warn;

use crate::constants::{MAX_SLOTS, SELECTION_VERSION_TAG};
use crate::types::{CharacterHandle, SlotMask};

// An exclusive character is either the default with no overrides, or absent.
#[derive(Clone, Debug)]
pub struct SelectionGroup {
    default: CharacterHandle,
    overrides: BTreeMap<usize, CharacterHandle>,
    neutral: CharacterHandle,
}

impl SelectionGroup {
    /// `neutral` must be multi-instance; it is the fallback for every ambiguity.
    pub fn new(neutral: CharacterHandle) -> Self {
        debug_assert!(neutral.multi_instance, "neutral character must be multi-instance");
        Self {
            default: neutral.clone(),
            overrides: BTreeMap::new(),
            neutral,
        }
    }

    pub fn default_character(&self) -> &CharacterHandle {
        &self.default
    }

    pub fn neutral(&self) -> &CharacterHandle {
        &self.neutral
    }

    pub fn overrides(&self) -> impl Iterator<Item = (usize, &CharacterHandle)> {
        self.overrides.iter().map(|(slot, def)| (*slot, def))
    }

    pub fn set_slot(&mut self, slot: usize, def: CharacterHandle) {
        if slot >= MAX_SLOTS {
            warn!(slot, character = %def.name, "ignoring selection for out-of-range slot");
            return;
        }
        if def == self.default {
            self.overrides.remove(&slot);
            return;
        }
        if !def.multi_instance {
            self.set_all(def);
            return;
        }
        if !self.default.multi_instance {
            self.set_all(self.neutral.clone());
        }
        if def == self.default {
            self.overrides.remove(&slot);
        } else {
            self.overrides.insert(slot, def);
        }
    }

    pub fn set_all(&mut self, def: CharacterHandle) {
        self.default = def;
        self.overrides.clear();
    }

    pub fn get_slot(&self, slot: usize) -> &CharacterHandle {
        self.overrides.get(&slot).unwrap_or(&self.default)
    }

    /// The character every active slot agrees on, or the neutral one when they
    /// disagree. With no active slots the group's default is returned.
    pub fn resolve_common(&self, active: SlotMask) -> CharacterHandle {
        let mut common: Option<&CharacterHandle> = None;
        for slot in active.iter() {
            let current = self.get_slot(slot);
            match common {
                None => common = Some(current),
                Some(existing) if existing == current => {}
                Some(_) => return self.neutral.clone(),
            }
        }
        common.unwrap_or(&self.default).clone()
    }

    pub fn to_text(&self) -> String {
        let mut lines = vec![SELECTION_VERSION_TAG.to_string(), self.default.name.clone()];
        for (slot, def) in &self.overrides {
            lines.push(format!("{slot}:{}", def.name));
        }
        lines.join("\n")
    }

    /// Parses either text format. Unknown characters fall back to `neutral`
    /// and malformed lines are skipped; parsing never fails.
    pub fn parse<F>(text: &str, neutral: CharacterHandle, resolve: F) -> Self
    where
        F: Fn(&str) -> Option<CharacterHandle>,
    {
        let mut group = Self::new(neutral);
        let lookup = |name: &str| -> CharacterHandle {
            resolve(name).unwrap_or_else(|| {
                warn!(character = name, "unknown character in selection, using neutral");
                group.neutral.clone()
            })
        };
        let mut lines = text.lines().map(|line| line.trim_end_matches('\r'));
        let mut assignments: Vec<(usize, CharacterHandle)> = Vec::new();
        let mut default = None;

        match lines.next() {
            None => {}
            Some(SELECTION_VERSION_TAG) => {
                default = lines.next().map(&lookup);
                for line in lines {
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = line
                        .split_once(':')
                        .and_then(|(slot, name)| slot.trim().parse::<usize>().ok().map(|slot| (slot, name)));
                    match parsed {
                        Some((slot, name)) => assignments.push((slot, lookup(name))),
                        None => warn!(line, "skipping malformed selection line"),
                    }
                }
            }
            Some(first) => {
                assignments.push((0, lookup(first)));
                for (offset, line) in lines.enumerate() {
                    assignments.push((offset + 1, lookup(line)));
                }
            }
        }

        if let Some(default) = default {
            group.set_all(default);
        }
        for (slot, def) in assignments {
            group.set_slot(slot, def);
        }
        group
    }
}
