// entity.rs — generational-index entity arena
//
// Entities are addressed by {slot index, generation} so a command or packet
// holding a reference to a destroyed entity fails a cheap existence check
// instead of touching a reused slot.

use crate::math::Vec3;

pub const MAX_ENTITIES: usize = 1024;

/// Stable handle to an arena slot. The generation changes every time the
/// slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub index: u16,
    pub generation: u16,
}

impl EntityId {
    pub fn to_raw(self) -> u32 {
        ((self.generation as u32) << 16) | self.index as u32
    }

    pub fn from_raw(raw: u32) -> Self {
        Self {
            index: (raw & 0xffff) as u16,
            generation: (raw >> 16) as u16,
        }
    }
}

/// The replicated portion of an entity plus the sync flags that decide who
/// simulates it.
#[derive(Debug, Clone, Default)]
pub struct EntityState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Vec3,
    /// Opaque game-specific state carried verbatim in snapshots.
    pub custom: String,
    /// Included in authoritative broadcasts.
    pub replicated: bool,
    /// False on clients for remote entities: the estimator owns the pose.
    pub simulated: bool,
}

struct Slot {
    generation: u16,
    state: Option<EntityState>,
}

pub struct EntityArena {
    slots: Vec<Slot>,
    free: Vec<u16>,
    live: usize,
}

impl EntityArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn spawn(&mut self, state: EntityState) -> EntityId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.state = Some(state);
            return EntityId {
                index,
                generation: slot.generation,
            };
        }
        assert!(self.slots.len() < MAX_ENTITIES, "entity arena full");
        let index = self.slots.len() as u16;
        self.slots.push(Slot {
            generation: 0,
            state: Some(state),
        });
        EntityId {
            index,
            generation: 0,
        }
    }

    /// Frees the slot and bumps its generation so stale handles go dead.
    /// Returns false if the handle was already dead.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.state.is_some() => {
                slot.state = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityState> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.state.as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut EntityState> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.state.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityState)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.state.as_ref().map(|state| {
                (
                    EntityId {
                        index: i as u16,
                        generation: slot.generation,
                    },
                    state,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut EntityState)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.state.as_mut().map(move |state| {
                (
                    EntityId {
                        index: i as u16,
                        generation,
                    },
                    state,
                )
            })
        })
    }
}

impl Default for EntityArena {
    fn default() -> Self {
        Self::new()
    }
}
