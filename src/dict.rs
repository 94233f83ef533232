use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use strum_macros::IntoStaticStr;

/// A stored value tagged with its data type.
#[derive(Clone, Debug, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Entity {
    String(Bytes),
    List(VecDeque<Bytes>),
}

impl Entity {
    /// Name of the data type, as reported by `TYPE`.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

/// Thread-safe key to entity map shared by all connections selecting the same database.
///
/// Every operation locks only the shard holding the key, and an entity is always replaced as a
/// whole, never mutated while visible to readers.
#[derive(Debug, Default)]
pub struct Dict {
    data: DashMap<String, Entity>,
}

impl Dict {
    pub fn new() -> Dict {
        Dict::default()
    }

    pub fn get(&self, key: &str) -> Option<Entity> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Inserts or replaces the entity, returning 1 when the key is new.
    pub fn put(&self, key: String, entity: Entity) -> usize {
        match self.data.insert(key, entity) {
            Some(_) => 0,
            None => 1,
        }
    }

    /// Inserts the entity only if the key is absent, returning 1 when it was inserted.
    pub fn put_if_absent(&self, key: String, entity: Entity) -> usize {
        match self.data.entry(key) {
            Entry::Occupied(_) => 0,
            Entry::Vacant(vacant) => {
                vacant.insert(entity);
                1
            }
        }
    }

    /// Replaces the entity only if the key is present, returning 1 when it was replaced.
    pub fn put_if_exists(&self, key: String, entity: Entity) -> usize {
        match self.data.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(entity);
                1
            }
            Entry::Vacant(_) => 0,
        }
    }

    pub fn remove(&self, key: &str) -> Option<Entity> {
        self.data.remove(key).map(|(_, entity)| entity)
    }

    /// Atomic read-modify-write of a single key.
    ///
    /// `f` receives the current entity (if any) and decides the new content of the slot:
    /// `Some` stores it, `None` removes the key. The slot stays locked for the duration of the
    /// call, and nothing is written when `f` fails.
    pub fn update<T, E>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&Entity>) -> Result<(Option<Entity>, T), E>,
    ) -> Result<T, E> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let (entity, out) = f(Some(occupied.get()))?;
                match entity {
                    Some(entity) => {
                        occupied.insert(entity);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                Ok(out)
            }
            Entry::Vacant(vacant) => {
                let (entity, out) = f(None)?;
                if let Some(entity) = entity {
                    vacant.insert(entity);
                }
                Ok(out)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}
