//! Scene items: the captured, serializable form of one live entity.
//!
//! Items reference each other only by name. A [`NameRef`] additionally
//! caches the position of its target in the owning bundle; the cache is
//! filled by [`crate::bundle::Bundle::restore_references`] and is never
//! written to an archive.

use crate::attribute::AttributeTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// NameRef
// ---------------------------------------------------------------------------

/// A by-name reference to another item (or a mesh snapshot).
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NameRef {
    pub name: String,
    /// Position of the target in the bundle, when resolved to an item.
    pub slot: Option<usize>,
}

impl NameRef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slot: None,
        }
    }
}

// The slot is a lookup cache; two refs to the same name are the same ref.
impl PartialEq for NameRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl From<String> for NameRef {
    fn from(name: String) -> Self {
        Self { name, slot: None }
    }
}

impl From<NameRef> for String {
    fn from(r: NameRef) -> Self {
        r.name
    }
}

impl From<&str> for NameRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for NameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// The value of one relationship field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    Single(Option<NameRef>),
    /// Order is significant.
    Many(Vec<NameRef>),
    /// Sparse key → target mapping.
    Keyed(BTreeMap<String, NameRef>),
}

impl Link {
    pub fn single(name: &str) -> Self {
        Link::Single(Some(NameRef::new(name)))
    }

    pub fn many<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Link::Many(names.into_iter().map(NameRef::new).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Link::Single(target) => target.is_none(),
            Link::Many(targets) => targets.is_empty(),
            Link::Keyed(targets) => targets.is_empty(),
        }
    }

    pub fn refs(&self) -> Vec<&NameRef> {
        match self {
            Link::Single(target) => target.iter().collect(),
            Link::Many(targets) => targets.iter().collect(),
            Link::Keyed(targets) => targets.values().collect(),
        }
    }

    pub fn refs_mut(&mut self) -> Vec<&mut NameRef> {
        match self {
            Link::Single(target) => target.iter_mut().collect(),
            Link::Many(targets) => targets.iter_mut().collect(),
            Link::Keyed(targets) => targets.values_mut().collect(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.refs().into_iter().map(|r| r.name.as_str()).collect()
    }

    /// Drop every target for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&mut NameRef) -> bool) {
        match self {
            Link::Single(target) => {
                if target.as_mut().is_some_and(|r| !keep(r)) {
                    *target = None;
                }
            }
            Link::Many(targets) => targets.retain_mut(|r| keep(r)),
            Link::Keyed(targets) => targets.retain(|_, r| keep(r)),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Kind of owned parameter an item refers to by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Map,
    Mesh,
}

// ---------------------------------------------------------------------------
// SceneItem
// ---------------------------------------------------------------------------

/// Captured state of one live entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneItem {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub name: String,
    #[serde(default)]
    pub attributes: AttributeTable,
    #[serde(default)]
    pub relationships: BTreeMap<String, Link>,
    #[serde(default)]
    pub parameters: BTreeMap<ParamKind, Vec<String>>,
}

impl SceneItem {
    pub fn new(type_tag: &str, name: &str) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            name: name.to_string(),
            attributes: AttributeTable::new(),
            relationships: BTreeMap::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn link(&self, field: &str) -> Option<&Link> {
        self.relationships.get(field)
    }

    pub fn set_link(&mut self, field: &str, link: Link) {
        self.relationships.insert(field.to_string(), link);
    }

    /// Names of the parameters of one kind, in capture order.
    pub fn params(&self, kind: ParamKind) -> &[String] {
        self.parameters.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a parameter name, ignoring duplicates.
    pub fn add_param(&mut self, kind: ParamKind, name: &str) {
        let list = self.parameters.entry(kind).or_default();
        if !list.iter().any(|n| n == name) {
            list.push(name.to_string());
        }
    }

    /// Every name this item refers to through its relationships.
    pub fn referenced_names(&self) -> Vec<&str> {
        self.relationships.values().flat_map(Link::names).collect()
    }

    /// Whether any relationship field or parameter list mentions `name`.
    pub fn mentions(&self, name: &str) -> bool {
        self.referenced_names().contains(&name)
            || self.parameters.values().flatten().any(|p| p == name)
    }

    /// Rewrite the item name, every relationship target and every parameter
    /// name through `rename`. Attribute values are left alone.
    pub fn rename_with(&mut self, rename: &dyn Fn(&str) -> String) {
        self.name = rename(&self.name);
        for link in self.relationships.values_mut() {
            for target in link.refs_mut() {
                target.name = rename(&target.name);
            }
        }
        for names in self.parameters.values_mut() {
            for name in names.iter_mut() {
                *name = rename(name);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Behaviour declarations
// ---------------------------------------------------------------------------

/// Which side of the connection the item is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Targets drive `item.<attr>` from their `message` plug.
    Incoming,
    /// The item's `message` plug drives `target.<attr>`; `indexed` targets
    /// are array plugs that receive the item at a free slot.
    Outgoing { indexed: bool },
}

/// Shape of a relationship field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Single,
    Many,
    Keyed,
}

/// How a relationship field maps onto live connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec {
    pub field: &'static str,
    pub attr: &'static str,
    pub direction: Direction,
    pub arity: Arity,
}

impl LinkSpec {
    pub const fn incoming(field: &'static str, attr: &'static str, arity: Arity) -> Self {
        Self {
            field,
            attr,
            direction: Direction::Incoming,
            arity,
        }
    }

    pub const fn outgoing(field: &'static str, attr: &'static str, indexed: bool) -> Self {
        Self {
            field,
            attr,
            direction: Direction::Outgoing { indexed },
            arity: Arity::Single,
        }
    }
}

/// An array attribute captured as a weight map over the mesh bound at
/// `geometry[geometry]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapSpec {
    pub attr: &'static str,
    pub geometry: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttrValue, Attribute};

    #[test]
    fn links_serialize_as_plain_names() {
        let mut item = SceneItem::new("attachment", "l_arm_attachment");
        item.set_link("targets", Link::many(["l_arm_tissue", "l_arm_bone"]));
        item.set_link("solver", Link::single("solver"));
        item.set_link("unset", Link::Single(None));
        let mut keyed = BTreeMap::new();
        keyed.insert("3".to_string(), NameRef::new("shape_a"));
        item.set_link("shapes", Link::Keyed(keyed));

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "attachment");
        assert_eq!(
            json["relationships"]["targets"],
            serde_json::json!(["l_arm_tissue", "l_arm_bone"])
        );
        assert_eq!(json["relationships"]["solver"], "solver");
        assert!(json["relationships"]["unset"].is_null());
        assert_eq!(json["relationships"]["shapes"]["3"], "shape_a");

        let back: SceneItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
        assert!(matches!(back.link("unset"), Some(Link::Single(None))));
        assert!(matches!(back.link("shapes"), Some(Link::Keyed(_))));
    }

    #[test]
    fn name_ref_equality_ignores_slot() {
        let mut a = NameRef::new("solver");
        a.slot = Some(4);
        assert_eq!(a, NameRef::new("solver"));
        assert_ne!(a, NameRef::new("solver1"));
    }

    #[test]
    fn retain_empties_single_and_filters_lists() {
        let mut single = Link::single("gone");
        single.retain(|r| r.name != "gone");
        assert!(single.is_empty());

        let mut many = Link::many(["a", "gone", "b"]);
        many.retain(|r| r.name != "gone");
        assert_eq!(many.names(), vec!["a", "b"]);
    }

    #[test]
    fn rename_touches_names_but_not_values() {
        let mut item = SceneItem::new("tissue", "l_arm_tissue");
        item.attributes.insert(
            "label".into(),
            Attribute::new(AttrValue::String("l_arm".into())),
        );
        item.set_link("solver", Link::single("solver"));
        item.add_param(ParamKind::Mesh, "l_arm");
        item.add_param(ParamKind::Mesh, "l_arm");
        item.rename_with(&|s: &str| s.replace("l_", "r_"));

        assert_eq!(item.name, "r_arm_tissue");
        assert_eq!(item.params(ParamKind::Mesh), ["r_arm"]);
        assert_eq!(item.referenced_names(), vec!["solver"]);
        assert_eq!(
            item.attributes["label"].value,
            AttrValue::String("l_arm".into())
        );
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let json = serde_json::json!({"type": "bone", "name": "b", "_class": "BoneNode"});
        let item: SceneItem = serde_json::from_value(json).unwrap();
        assert!(item.attributes.is_empty());
        assert!(item.relationships.is_empty());
        assert!(item.params(ParamKind::Map).is_empty());
    }
}
