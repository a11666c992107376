use std::sync::Arc;

use tracing::{info, warn};

use crate::config::HostConfig;
use crate::error::{RegistryError, StoreError};
use crate::lifecycle::{CharacterHooks, Lifecycles, NoopHooks};
use crate::registry::CharacterRegistry;
use crate::save_codec::{discard_volatile_section, wipe_sections, CharacterSaveData};
use crate::save_store::{FileSaveStore, SaveStore};
use crate::selection::SelectionGroup;
use crate::tracker::InstanceTracker;
use crate::types::{
    CharacterDefinition, CharacterHandle, LifecycleState, PlayerId, RawSelector,
    SelectionContext, SessionId, SlotMask,
};

pub struct CharacterHost {
    config: HostConfig,
    builtins: Vec<CharacterHandle>,
    registry: CharacterRegistry,
    lifecycles: Lifecycles,
    tracker: InstanceTracker,
    selection: SelectionGroup,
}

impl CharacterHost {
    /// Registers the characters listed in the config with no-op hooks.
    pub fn new(config: HostConfig) -> Result<Self, RegistryError> {
        let builtins: Vec<CharacterHandle> = config
            .builtin_characters
            .iter()
            .map(|name| Arc::new(CharacterDefinition::builtin(name.clone())))
            .collect();
        let neutral = builtins
            .first()
            .cloned()
            .unwrap_or_else(|| Arc::new(CharacterDefinition::builtin(config.neutral_name())));
        let manifests = config.characters.clone();
        let mut host = Self {
            registry: CharacterRegistry::new(config.first_custom_index()),
            lifecycles: Lifecycles::new(),
            tracker: InstanceTracker::new(),
            selection: SelectionGroup::new(neutral),
            builtins,
            config,
        };
        for manifest in manifests {
            host.register(
                &manifest.name,
                manifest.multi_instance,
                &manifest.version,
                Box::new(NoopHooks),
            )?;
        }
        Ok(host)
    }

    pub fn register(
        &mut self,
        name: &str,
        multi_instance: bool,
        version: &str,
        hooks: Box<dyn CharacterHooks>,
    ) -> Result<CharacterHandle, RegistryError> {
        if self.builtin(name).is_some() {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        let handle = self
            .registry
            .register(CharacterDefinition::new(name, multi_instance, version))?;
        self.lifecycles.insert(handle.clone(), hooks);
        Ok(handle)
    }

    /// Closes registration and fixes every character index.
    pub fn start_main_loop(&mut self) {
        if self.registry.is_closed() {
            return;
        }
        self.registry.resolve_all_indices();
        info!(
            characters = self.registry.len(),
            first_custom_index = self.registry.first_custom_index(),
            "character registration closed"
        );
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &CharacterRegistry {
        &self.registry
    }

    pub fn lifecycles(&self) -> &Lifecycles {
        &self.lifecycles
    }

    pub fn tracker(&self) -> &InstanceTracker {
        &self.tracker
    }

    pub fn selection(&self) -> &SelectionGroup {
        &self.selection
    }

    pub fn neutral(&self) -> &CharacterHandle {
        self.selection.neutral()
    }

    pub fn lifecycle_state(&self, name: &str) -> LifecycleState {
        self.lifecycles.state(name)
    }

    pub fn instance_count(&self, name: &str) -> u32 {
        self.lifecycles.instance_count(name)
    }

    fn builtin(&self, name: &str) -> Option<&CharacterHandle> {
        self.builtins.iter().find(|def| def.name == name)
    }

    pub fn find_character(&self, name: &str) -> Option<CharacterHandle> {
        self.builtin(name)
            .or_else(|| self.registry.lookup_by_name(name))
            .cloned()
    }

    pub fn index_of(&mut self, name: &str) -> Option<u32> {
        if let Some(position) = self.builtins.iter().position(|def| def.name == name) {
            return Some(position as u32);
        }
        let handle = self.registry.lookup_by_name(name)?.clone();
        self.registry.resolve_index(&handle)
    }

    /// Maps a host token to a managed character; built-ins map to `None`.
    pub fn resolve_selector(&self, selector: &RawSelector) -> Option<CharacterHandle> {
        match selector {
            RawSelector::Index(index) => {
                if *index < self.registry.first_custom_index() {
                    return None;
                }
                let found = self.registry.lookup_by_index(*index).cloned();
                if found.is_none() {
                    warn!(index, "no character registered at index");
                }
                found
            }
            RawSelector::Name(name) => {
                if self.builtin(name).is_some() {
                    return None;
                }
                let found = self.registry.lookup_by_name(name).cloned();
                if found.is_none() {
                    warn!(character = %name, "no character registered with name");
                }
                found
            }
        }
    }

    pub fn select(&mut self, slot: usize, name: &str) -> bool {
        match self.find_character(name) {
            Some(def) => {
                self.selection.set_slot(slot, def);
                true
            }
            None => {
                warn!(slot, character = %name, "cannot select unknown character");
                false
            }
        }
    }

    pub fn select_all(&mut self, name: &str) -> bool {
        match self.find_character(name) {
            Some(def) => {
                self.selection.set_all(def);
                true
            }
            None => {
                warn!(character = %name, "cannot select unknown character");
                false
            }
        }
    }

    pub fn selection_text(&self) -> String {
        self.selection.to_text()
    }

    pub fn restore_selection(&mut self, text: &str) {
        let restored = SelectionGroup::parse(text, self.neutral().clone(), |name| {
            self.find_character(name)
        });
        self.selection = restored;
    }

    fn managed(def: CharacterHandle) -> Option<CharacterHandle> {
        (!def.builtin).then_some(def)
    }

    /// Lets the likely world character load ahead of the session. A prepared
    /// character that never gets an instance stays `Prepared`; only the last
    /// instance leaving runs `disable`.
    pub fn prepare_selection(&mut self, active: SlotMask) {
        if let Some(def) = Self::managed(self.selection.resolve_common(active)) {
            self.lifecycles.request_prepare(&def);
        }
    }

    pub fn on_session_start(
        &mut self,
        session: SessionId,
        context: SelectionContext,
    ) -> Option<CharacterHandle> {
        self.start_main_loop();
        if self.tracker.has_session(session) {
            warn!(%session, "session started twice; ending the previous one first");
            self.tracker.end_session(&mut self.lifecycles, session);
        }
        let world = Self::managed(self.selection.resolve_common(context.active_slots));
        if let Some(def) = &world {
            self.lifecycles.request_enable(def);
        }
        self.tracker.bind_session(session, world.clone());
        info!(
            %session,
            world = world.as_ref().map(|def| def.name.as_str()),
            "session started"
        );
        world
    }

    pub fn on_player_realized(
        &mut self,
        session: SessionId,
        player: PlayerId,
        selector: &RawSelector,
    ) -> Option<CharacterHandle> {
        let def = self.resolve_selector(selector);
        self.tracker
            .bind_player(&mut self.lifecycles, session, player, def.clone());
        def
    }

    pub fn on_session_end(&mut self, session: SessionId) {
        self.tracker.end_session(&mut self.lifecycles, session);
    }

    /// World character first, then each distinct player character.
    pub fn session_characters(&self, session: SessionId) -> Vec<CharacterHandle> {
        let mut characters: Vec<CharacterHandle> = Vec::new();
        let world = self.tracker.character_for_session(session).cloned();
        let players = self.tracker.players(session).map(|(_, def)| def.clone());
        for def in world.into_iter().chain(players) {
            if !characters.contains(&def) {
                characters.push(def);
            }
        }
        characters
    }

    pub fn save_session(&mut self, session: SessionId, host_blob: &str) -> String {
        let mut blob = host_blob.to_string();
        for def in self.session_characters(session) {
            let mut data = CharacterSaveData::default();
            self.lifecycles.save(&def, &mut data);
            blob = data.embed(&blob, &def.name, &def.format_version);
        }
        blob
    }

    pub fn load_session(&mut self, session: SessionId, host_blob: &str) {
        for def in self.session_characters(session) {
            let data = CharacterSaveData::extract(host_blob, &def.name);
            if let Some(stored) = &data.stored_version {
                if *stored != def.format_version {
                    info!(
                        character = %def.name,
                        stored = %stored,
                        current = %def.format_version,
                        "loading save data written by another format version"
                    );
                }
            }
            self.lifecycles.load(&def, &data);
        }
    }

    pub fn discard_volatile(&self, host_blob: &str, character: &str) -> String {
        discard_volatile_section(host_blob, character)
    }

    pub fn wipe_character(&self, host_blob: &str, character: &str) -> String {
        wipe_sections(host_blob, character)
    }

    /// File store rooted at the configured save directory, if there is one.
    pub fn file_store(&self) -> Option<FileSaveStore> {
        self.config.save_dir.clone().map(FileSaveStore::new)
    }

    fn store_key(&self, session: SessionId) -> String {
        self.tracker
            .character_for_session(session)
            .unwrap_or_else(|| self.neutral())
            .name
            .clone()
    }

    pub fn save_to_store(
        &mut self,
        store: &mut dyn SaveStore,
        session: SessionId,
        slot: u32,
        host_blob: &str,
    ) -> Result<(), StoreError> {
        let blob = self.save_session(session, host_blob);
        store.write(&self.store_key(session), slot, &blob)
    }

    pub fn load_from_store(
        &mut self,
        store: &dyn SaveStore,
        session: SessionId,
        slot: u32,
    ) -> Result<Option<String>, StoreError> {
        let Some(blob) = store.read(&self.store_key(session), slot)? else {
            return Ok(None);
        };
        self.load_session(session, &blob);
        Ok(Some(blob))
    }
}
