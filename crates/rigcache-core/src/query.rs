//! Read-only filtering of the items held in a bundle.
//!
//! All criteria that are set must match; `invert` flips the result. A
//! filter with no criteria returns every item without inspecting them.

use crate::bundle::Bundle;
use crate::item::{ParamKind, SceneItem};
use regex::Regex;

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Match any of these type tags.
    pub types: Vec<String>,
    /// Match any of these exact names.
    pub names: Vec<String>,
    pub name_regex: Option<Regex>,
    /// Match items related to any of these names, through a relationship
    /// field, a parameter, or a map bound to the named mesh.
    pub association: Vec<String>,
    pub invert: bool,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, tag: &str) -> Self {
        self.types.push(tag.to_string());
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.names.push(name.to_string());
        self
    }

    pub fn matching(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.name_regex = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn associated_with(mut self, name: &str) -> Self {
        self.association.push(name.to_string());
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.names.is_empty()
            && self.name_regex.is_none()
            && self.association.is_empty()
    }

    pub fn apply<'b>(&self, bundle: &'b Bundle) -> Vec<&'b SceneItem> {
        if self.is_empty() {
            return bundle.iter().collect();
        }
        bundle
            .iter()
            .filter(|item| self.matches(bundle, item) != self.invert)
            .collect()
    }

    fn matches(&self, bundle: &Bundle, item: &SceneItem) -> bool {
        if !self.types.is_empty() && !self.types.contains(&item.type_tag) {
            return false;
        }
        if !self.names.is_empty() && !self.names.contains(&item.name) {
            return false;
        }
        if self
            .name_regex
            .as_ref()
            .is_some_and(|re| !re.is_match(&item.name))
        {
            return false;
        }
        if !self.association.is_empty() {
            let related = self.association.iter().any(|name| {
                item.mentions(name)
                    || item
                        .params(ParamKind::Map)
                        .iter()
                        .filter_map(|m| bundle.parameters.map(m))
                        .any(|m| &m.mesh == name)
            });
            if !related {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Link;
    use crate::map::WeightMap;

    fn sample() -> Bundle {
        let solver = SceneItem::new("solver", "solver");
        let mut l_tissue = SceneItem::new("tissue", "l_arm_tissue");
        l_tissue.set_link("solver", Link::single("solver"));
        l_tissue.add_param(ParamKind::Mesh, "l_arm");
        let mut r_tissue = SceneItem::new("tissue", "r_arm_tissue");
        r_tissue.set_link("solver", Link::single("solver"));
        let mut fiber = SceneItem::new("fiber", "l_arm_fiber");
        fiber.add_param(ParamKind::Map, "l_arm_fiber.weights");
        let mut bundle = Bundle::from_items([solver, l_tissue, r_tissue, fiber]);
        bundle.parameters.upsert_map(WeightMap::new(
            "l_arm_fiber",
            "weights",
            "l_arm",
            vec![],
        ));
        bundle
    }

    fn names<'a>(items: &[&'a SceneItem]) -> Vec<&'a str> {
        items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn empty_filter_returns_everything() {
        let bundle = sample();
        assert_eq!(ItemFilter::new().apply(&bundle).len(), 4);
        assert_eq!(ItemFilter::new().inverted().apply(&bundle).len(), 4);
    }

    #[test]
    fn criteria_combine() {
        let bundle = sample();
        let filter = ItemFilter::new().of_type("tissue").matching("^l_").unwrap();
        assert_eq!(names(&filter.apply(&bundle)), vec!["l_arm_tissue"]);

        let inverted = filter.inverted();
        assert_eq!(
            names(&inverted.apply(&bundle)),
            vec!["solver", "r_arm_tissue", "l_arm_fiber"]
        );
    }

    #[test]
    fn association_follows_links_params_and_map_meshes() {
        let bundle = sample();
        let by_solver = ItemFilter::new().associated_with("solver");
        assert_eq!(
            names(&by_solver.apply(&bundle)),
            vec!["l_arm_tissue", "r_arm_tissue"]
        );
        let by_mesh = ItemFilter::new().associated_with("l_arm");
        assert_eq!(
            names(&by_mesh.apply(&bundle)),
            vec!["l_arm_tissue", "l_arm_fiber"]
        );
    }

    #[test]
    fn exact_names() {
        let bundle = sample();
        let filter = ItemFilter::new().named("solver").named("nope");
        assert_eq!(names(&filter.apply(&bundle)), vec!["solver"]);
    }
}
