use crate::behavior::{
    ATTACHMENT, BONE, CLOTH, EMBEDDER, FIBER, GenericBehavior, ItemBehavior, MATERIAL,
    RestShapeBehavior, SOLVER, SOLVER_TRANSFORM, TISSUE,
};
use crate::item::SceneItem;
use std::collections::HashMap;

/// Built-in build order. Types not listed sort after all of these.
pub const DEFAULT_PRIORITY: [&str; 10] = [
    "solver_transform",
    "solver",
    "embedder",
    "bone",
    "tissue",
    "cloth",
    "attachment",
    "fiber",
    "material",
    "restshape",
];

/// Type tag → behaviour, plus the type-priority order capture and build
/// walk in. Unregistered tags resolve to [`GenericBehavior`].
pub struct TypeRegistry {
    behaviors: HashMap<String, Box<dyn ItemBehavior>>,
    priority: Vec<String>,
    generic: GenericBehavior,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TypeRegistry {
    /// A registry with no behaviours; everything is generic.
    pub fn empty() -> Self {
        Self {
            behaviors: HashMap::new(),
            priority: Vec::new(),
            generic: GenericBehavior,
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for behavior in [
            SOLVER_TRANSFORM,
            SOLVER,
            EMBEDDER,
            BONE,
            TISSUE,
            CLOTH,
            ATTACHMENT,
            FIBER,
            MATERIAL,
        ] {
            registry.register(Box::new(behavior));
        }
        registry.register(Box::new(RestShapeBehavior));
        registry
    }

    /// Register (or replace) the behaviour for its type tag. New tags are
    /// appended to the priority order.
    pub fn register(&mut self, behavior: Box<dyn ItemBehavior>) {
        let tag = behavior.type_tag().to_string();
        if !self.priority.contains(&tag) {
            self.priority.push(tag.clone());
        }
        self.behaviors.insert(tag, behavior);
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.behaviors.contains_key(tag)
    }

    pub fn behavior(&self, tag: &str) -> &dyn ItemBehavior {
        self.behaviors
            .get(tag)
            .map_or(&self.generic as &dyn ItemBehavior, |b| b.as_ref())
    }

    /// Tag of the registered behaviour writing `class` into archives.
    pub fn tag_for_class(&self, class: &str) -> Option<&str> {
        self.behaviors
            .values()
            .find(|b| b.class_name() == class)
            .map(|b| b.type_tag())
    }

    pub fn priority_order(&self) -> &[String] {
        &self.priority
    }

    /// Rank of a tag in build order; unknown tags share the last rank.
    pub fn priority(&self, tag: &str) -> usize {
        self.priority
            .iter()
            .position(|t| t == tag)
            .unwrap_or(self.priority.len())
    }

    /// Move the given tags to the front, in the given order. Tags not
    /// mentioned keep their relative order after them.
    pub fn set_priority<S: AsRef<str>>(&mut self, order: &[S]) {
        let mut next: Vec<String> = Vec::with_capacity(self.priority.len());
        for tag in order {
            let tag = tag.as_ref().to_string();
            if !next.contains(&tag) {
                next.push(tag);
            }
        }
        for tag in self.priority.drain(..) {
            if !next.contains(&tag) {
                next.push(tag);
            }
        }
        self.priority = next;
    }

    /// Stable sort by type priority.
    pub fn sort_items(&self, items: &mut [SceneItem]) {
        items.sort_by_key(|item| self.priority(&item.type_tag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tags_fall_back_to_generic() {
        let registry = TypeRegistry::default();
        assert_eq!(registry.behavior("tissue").class_name(), "TissueNode");
        assert_eq!(registry.behavior("lightRig").class_name(), "SceneItem");
        assert!(!registry.is_registered("lightRig"));
        assert_eq!(registry.tag_for_class("FiberNode"), Some("fiber"));
    }

    #[test]
    fn builtin_priority_puts_roots_first() {
        let registry = TypeRegistry::default();
        assert_eq!(registry.priority_order(), DEFAULT_PRIORITY);
        assert!(registry.priority("solver") < registry.priority("tissue"));
        assert_eq!(registry.priority("unknown"), DEFAULT_PRIORITY.len());
        assert!(registry.behavior("solver").is_root());
        assert!(!registry.behavior("fiber").is_root());
    }

    #[test]
    fn override_moves_tags_forward() {
        let mut registry = TypeRegistry::default();
        registry.set_priority(&["bone", "custom", "solver"]);
        let order = registry.priority_order();
        assert_eq!(&order[..3], ["bone", "custom", "solver"]);
        assert_eq!(order[3], "solver_transform");
        assert_eq!(order.len(), DEFAULT_PRIORITY.len() + 1);
    }

    #[test]
    fn sort_is_stable_within_a_type() {
        let registry = TypeRegistry::default();
        let mut items = vec![
            SceneItem::new("fiber", "f"),
            SceneItem::new("tissue", "t2"),
            SceneItem::new("mystery", "m"),
            SceneItem::new("tissue", "t1"),
            SceneItem::new("solver", "s"),
        ];
        registry.sort_items(&mut items);
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["s", "t2", "t1", "f", "m"]);
    }
}
