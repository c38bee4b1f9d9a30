use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies a live entity in a host scene.
    pub struct EntityId;
}

/// Output plug every entity exposes for relationship connections.
pub const MESSAGE: &str = "message";

/// Array attribute on a deformer or container that binds geometry.
pub const GEOMETRY: &str = "geometry";

/// One endpoint of a connection: an attribute on an entity, optionally
/// addressed by array index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Plug {
    pub entity: EntityId,
    pub attr: String,
    pub index: Option<u32>,
}

impl Plug {
    pub fn new(entity: EntityId, attr: &str) -> Self {
        Self {
            entity,
            attr: attr.to_string(),
            index: None,
        }
    }

    pub fn indexed(entity: EntityId, attr: &str, index: u32) -> Self {
        Self {
            entity,
            attr: attr.to_string(),
            index: Some(index),
        }
    }

    /// The `message` output plug of an entity.
    pub fn message(entity: EntityId) -> Self {
        Self::new(entity, MESSAGE)
    }

    /// Same attribute on a different entity, keeping the index.
    pub fn on(&self, entity: EntityId) -> Self {
        Self {
            entity,
            attr: self.attr.clone(),
            index: self.index,
        }
    }

    /// Whether two plugs address the same attribute, ignoring the index.
    pub fn same_attr(&self, other: &Plug) -> bool {
        self.entity == other.entity && self.attr == other.attr
    }
}

impl fmt::Display for Plug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{:?}.{}[{}]", self.entity, self.attr, i),
            None => write!(f, "{:?}.{}", self.entity, self.attr),
        }
    }
}

/// A directed connection from a source plug to a destination plug.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub src: Plug,
    pub dst: Plug,
}

impl Connection {
    pub fn new(src: Plug, dst: Plug) -> Self {
        Self { src, dst }
    }

    /// Whether either endpoint lives on `entity`.
    pub fn touches(&self, entity: EntityId) -> bool {
        self.src.entity == entity || self.dst.entity == entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn plug_on_keeps_attr_and_index() {
        let mut keys: SlotMap<EntityId, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let plug = Plug::indexed(a, "inputs", 3);
        let moved = plug.on(b);
        assert_eq!(moved.entity, b);
        assert_eq!(moved.attr, "inputs");
        assert_eq!(moved.index, Some(3));
        assert!(!plug.same_attr(&moved));
        assert!(moved.same_attr(&Plug::indexed(b, "inputs", 7)));
    }

    #[test]
    fn connection_touches_both_ends() {
        let mut keys: SlotMap<EntityId, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());
        let conn = Connection::new(Plug::message(a), Plug::new(b, "solver"));
        assert!(conn.touches(a));
        assert!(conn.touches(b));
        assert!(!conn.touches(c));
    }
}
