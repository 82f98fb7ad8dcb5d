//! World snapshot and anchor resolution.

use std::collections::HashMap;

use audio_stream_proto::{Anchor, EntityId, Vec3};

use crate::error::StreamFault;

/// Entity lookup consumed by the resolver.
pub trait EntityLookup {
    fn find_entity(&self, entity: EntityId) -> Option<Vec3>;
}

/// Receiver-side view of the tracked world: listener plus entity positions.
#[derive(Debug, Default, Clone)]
pub struct WorldSnapshot {
    listener: Vec3,
    entities: HashMap<EntityId, Vec3>,
}

impl WorldSnapshot {
    pub fn new(listener: Vec3) -> Self {
        Self {
            listener,
            entities: HashMap::new(),
        }
    }

    pub fn listener(&self) -> Vec3 {
        self.listener
    }

    pub fn set_listener(&mut self, position: Vec3) {
        self.listener = position;
    }

    pub fn move_entity(&mut self, entity: EntityId, position: Vec3) {
        self.entities.insert(entity, position);
    }

    pub fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.entities.remove(&entity).is_some()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

impl EntityLookup for WorldSnapshot {
    fn find_entity(&self, entity: EntityId) -> Option<Vec3> {
        self.entities.get(&entity).copied()
    }
}

/// Current emission point of `anchor`.
///
/// A followed entity that cannot be found is [`StreamFault::AnchorLost`].
pub fn resolve<W: EntityLookup + ?Sized>(anchor: &Anchor, world: &W) -> Result<Vec3, StreamFault> {
    match anchor {
        Anchor::StaticPoint(p) => Ok(*p),
        Anchor::FollowedEntity(e) => world.find_entity(*e).ok_or(StreamFault::AnchorLost(*e)),
    }
}
