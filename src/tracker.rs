use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info};

use crate::lifecycle::Lifecycles;
use crate::types::{same_character, CharacterHandle, PlayerId, SessionId};

#[derive(Clone, Debug, Default)]
struct SessionBindings {
    world: Option<CharacterHandle>,
    players: BTreeMap<PlayerId, CharacterHandle>,
    announced: HashSet<PlayerId>,
}

/// Player bindings hold an instance on their character's lifecycle controller.
/// The world binding is only recorded here; whoever enables the world
/// character at session start hands its instance over to `end_session`.
#[derive(Default)]
pub struct InstanceTracker {
    sessions: HashMap<SessionId, SessionBindings>,
}

impl InstanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_session(&mut self, session: SessionId, def: Option<CharacterHandle>) {
        debug!(
            %session,
            character = def.as_ref().map(|def| def.name.as_str()),
            "bound world character"
        );
        self.sessions.entry(session).or_default().world = def;
    }

    pub fn bind_player(
        &mut self,
        lifecycles: &mut Lifecycles,
        session: SessionId,
        player: PlayerId,
        def: Option<CharacterHandle>,
    ) {
        let bindings = self.sessions.entry(session).or_default();
        let previous = bindings.players.get(&player);
        if same_character(previous, def.as_ref()) {
            return;
        }

        if let Some(old) = bindings.players.remove(&player) {
            lifecycles.request_disable(&old);
        }
        let Some(new) = def else {
            debug!(%session, %player, "player unbound");
            return;
        };
        lifecycles.request_enable(&new);
        bindings.players.insert(player, new.clone());
        debug!(%session, %player, character = %new.name, "player bound");

        if bindings.announced.insert(player) {
            lifecycles.notify_player_added(&new, session, player);
        }
    }

    /// Releases every player instance, then the world instance, then forgets the session.
    pub fn end_session(&mut self, lifecycles: &mut Lifecycles, session: SessionId) {
        let Some(bindings) = self.sessions.remove(&session) else {
            debug!(%session, "ending unknown session");
            return;
        };
        let player_count = bindings.players.len();
        for def in bindings.players.values() {
            lifecycles.request_disable(def);
        }
        if let Some(world) = &bindings.world {
            lifecycles.request_disable(world);
        }
        info!(
            %session,
            players = player_count,
            world = bindings.world.as_ref().map(|def| def.name.as_str()),
            "session ended"
        );
    }

    pub fn character_for_session(&self, session: SessionId) -> Option<&CharacterHandle> {
        self.sessions.get(&session)?.world.as_ref()
    }

    pub fn character_for_player(&self, session: SessionId, player: PlayerId) -> Option<&CharacterHandle> {
        self.sessions.get(&session)?.players.get(&player)
    }

    pub fn players(&self, session: SessionId) -> impl Iterator<Item = (PlayerId, &CharacterHandle)> {
        self.sessions
            .get(&session)
            .into_iter()
            .flat_map(|bindings| bindings.players.iter().map(|(player, def)| (*player, def)))
    }

    pub fn has_session(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
