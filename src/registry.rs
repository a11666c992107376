use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::types::{CharacterDefinition, CharacterHandle};

pub fn is_valid_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == ' ')
}

fn cmp_case_insensitive(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Indices are `first_custom_index + position`. Once the first index has been
/// handed out the list is frozen: no further registrations and no change to
/// the base index, so every index stays stable for the rest of the process.
pub struct CharacterRegistry {
    by_name: HashMap<String, CharacterHandle>,
    ordered: Vec<CharacterHandle>,
    indices: HashMap<String, u32>,
    first_custom_index: u32,
    closed: bool,
}

impl CharacterRegistry {
    pub fn new(first_custom_index: u32) -> Self {
        Self {
            by_name: HashMap::new(),
            ordered: Vec::new(),
            indices: HashMap::new(),
            first_custom_index,
            closed: false,
        }
    }

    pub fn register(&mut self, def: CharacterDefinition) -> Result<CharacterHandle, RegistryError> {
        if !is_valid_name(&def.name) {
            return Err(RegistryError::InvalidName(def.name));
        }
        if self.closed {
            return Err(RegistryError::RegistrationClosed(def.name));
        }
        if self.by_name.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }

        let position = self
            .ordered
            .iter()
            .position(|existing| cmp_case_insensitive(&existing.name, &def.name) != Ordering::Less)
            .unwrap_or(self.ordered.len());
        let handle = Arc::new(def);
        self.ordered.insert(position, handle.clone());
        self.by_name.insert(handle.name.clone(), handle.clone());
        info!(
            character = %handle.name,
            multi_instance = handle.multi_instance,
            version = %handle.format_version,
            "registered character"
        );
        Ok(handle)
    }

    /// Stops accepting registrations. Indices may still be unassigned.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn first_custom_index(&self) -> u32 {
        self.first_custom_index
    }

    /// Returns false, leaving the base unchanged, once any index was assigned.
    pub fn set_first_custom_index(&mut self, value: u32) -> bool {
        if !self.indices.is_empty() {
            warn!(
                current = self.first_custom_index,
                requested = value,
                "first custom index is fixed after indices were assigned"
            );
            return false;
        }
        self.first_custom_index = value;
        true
    }

    pub fn resolve_index(&mut self, def: &CharacterDefinition) -> Option<u32> {
        if let Some(index) = self.indices.get(&def.name) {
            return Some(*index);
        }
        let position = self
            .ordered
            .iter()
            .position(|existing| existing.name == def.name)?;
        let Some(index) = u32::try_from(position)
            .ok()
            .and_then(|offset| self.first_custom_index.checked_add(offset))
        else {
            warn!(
                character = %def.name,
                first_custom_index = self.first_custom_index,
                position,
                "character index does not fit in u32"
            );
            return None;
        };
        self.closed = true;
        self.indices.insert(def.name.clone(), index);
        debug!(character = %def.name, index, "assigned character index");
        Some(index)
    }

    pub fn resolve_all_indices(&mut self) {
        let handles = self.ordered.clone();
        for handle in handles {
            self.resolve_index(&handle);
        }
        self.closed = true;
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&CharacterHandle> {
        self.by_name.get(name)
    }

    pub fn lookup_by_index(&self, index: u32) -> Option<&CharacterHandle> {
        if let Some((name, _)) = self.indices.iter().find(|(_, assigned)| **assigned == index) {
            return self.by_name.get(name);
        }
        let position = index.checked_sub(self.first_custom_index)? as usize;
        self.ordered.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterHandle> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, multi_instance: bool) -> CharacterDefinition {
        CharacterDefinition::new(name, multi_instance, "1")
    }

    fn names(registry: &CharacterRegistry) -> Vec<String> {
        registry.iter().map(|handle| handle.name.clone()).collect()
    }

    #[test]
    fn index_overflow_yields_none_instead_of_panicking() {
        let mut registry = CharacterRegistry::new(u32::MAX);
        registry.register(def("A", true)).expect("A");
        registry.register(def("B", true)).expect("B");
        registry.resolve_all_indices();
        let a = registry.lookup_by_name("A").expect("A").clone();
        let b = registry.lookup_by_name("B").expect("B").clone();
        assert_eq!(registry.resolve_index(&a), Some(u32::MAX));
        assert_eq!(registry.resolve_index(&b), None);
        assert_eq!(
            registry.lookup_by_index(u32::MAX).map(|d| d.name.as_str()),
            Some("A")
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = CharacterRegistry::new(3);
        registry.register(def("A", false)).expect("first registration");
        let result = registry.register(def("A", true));
        assert_eq!(result.err(), Some(RegistryError::DuplicateName("A".to_string())));
        assert_eq!(registry.len(), 1);
        assert!(!registry.lookup_by_name("A").expect("A exists").multi_instance);
    }

    #[test]
    fn names_are_case_sensitive_for_uniqueness() {
        let mut registry = CharacterRegistry::new(0);
        registry.register(def("gourmand", true)).expect("lower");
        registry.register(def("Gourmand", true)).expect("upper");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut registry = CharacterRegistry::new(0);
        for name in ["", "bad:name", "semi;colon", "new\nline"] {
            assert_eq!(
                registry.register(def(name, true)).err(),
                Some(RegistryError::InvalidName(name.to_string()))
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn valid_names_allow_word_characters_and_spaces() {
        assert!(is_valid_name("The Saint"));
        assert!(is_valid_name("slug_cat_2"));
        assert!(is_valid_name("Ünïcode"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("dash-ed"));
    }

    #[test]
    fn ordered_list_is_case_insensitive() {
        let mut registry = CharacterRegistry::new(0);
        for name in ["rivulet", "Artificer", "saint", "Gourmand"] {
            registry.register(def(name, true)).expect("register");
        }
        assert_eq!(names(&registry), vec!["Artificer", "Gourmand", "rivulet", "saint"]);
    }

    #[test]
    fn equal_names_insert_before_existing_entry() {
        let mut registry = CharacterRegistry::new(0);
        registry.register(def("abc", true)).expect("lower");
        registry.register(def("ABC", true)).expect("upper");
        assert_eq!(names(&registry), vec!["ABC", "abc"]);
    }

    #[test]
    fn indices_are_lazy_stable_and_offset() {
        let mut registry = CharacterRegistry::new(3);
        let b = registry.register(def("B", true)).expect("B");
        let a = registry.register(def("A", true)).expect("A");

        assert_eq!(registry.resolve_index(&b), Some(4));
        assert_eq!(registry.resolve_index(&a), Some(3));
        assert_eq!(registry.resolve_index(&b), Some(4));
        assert_eq!(registry.lookup_by_index(3).map(|h| h.name.as_str()), Some("A"));
        assert_eq!(registry.lookup_by_index(4).map(|h| h.name.as_str()), Some("B"));
        assert!(registry.lookup_by_index(2).is_none());
        assert!(registry.lookup_by_index(5).is_none());
    }

    #[test]
    fn assigning_an_index_freezes_registration_and_base() {
        let mut registry = CharacterRegistry::new(3);
        let a = registry.register(def("A", true)).expect("A");
        assert!(registry.set_first_custom_index(5));
        assert_eq!(registry.resolve_index(&a), Some(5));

        assert!(!registry.set_first_custom_index(9));
        assert_eq!(registry.first_custom_index(), 5);
        assert_eq!(
            registry.register(def("Z", true)).err(),
            Some(RegistryError::RegistrationClosed("Z".to_string()))
        );
    }

    #[test]
    fn unregistered_definition_has_no_index() {
        let mut registry = CharacterRegistry::new(0);
        assert_eq!(registry.resolve_index(&def("Ghost", true)), None);
        assert!(!registry.is_closed());
    }

    #[test]
    fn resolve_all_indices_closes_registry() {
        let mut registry = CharacterRegistry::new(1);
        registry.register(def("A", true)).expect("A");
        registry.register(def("B", false)).expect("B");
        registry.resolve_all_indices();
        assert!(registry.is_closed());
        assert_eq!(registry.lookup_by_index(2).map(|h| h.name.as_str()), Some("B"));
    }
}
