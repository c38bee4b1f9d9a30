//! Copy, cut and paste of captured rig fragments.
//!
//! The clipboard holds one captured bundle. Pasting builds a deep copy, so
//! the same contents can be pasted any number of times.

use crate::builder::{BuildError, BuildOptions, BuildReport, Builder, Retrieval, Root, Traversal};
use crate::bundle::Bundle;
use crate::id::EntityId;
use crate::registry::TypeRegistry;
use crate::scene::{MESH_TYPE, Scene, SceneError};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("clipboard is empty")]
    Empty,
    #[error("nothing selected")]
    NothingSelected,
    #[error("no entity named '{0}'")]
    RootNotFound(String),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Build(#[from] BuildError),
}

#[derive(Debug, Clone, Default)]
pub struct Clipboard {
    registry: Arc<TypeRegistry>,
    contents: Option<Bundle>,
    origin: Option<String>,
}

impl Clipboard {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            contents: None,
            origin: None,
        }
    }

    pub fn contents(&self) -> Option<&Bundle> {
        self.contents.as_ref()
    }

    /// Host fingerprint of the scene the contents were copied from.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_none()
    }

    pub fn clear(&mut self) {
        self.contents = None;
        self.origin = None;
    }

    /// Capture from `root`, replacing the clipboard contents. Returns the
    /// number of items captured.
    pub fn copy(
        &mut self,
        scene: &dyn Scene,
        root: Root,
        traversal: Traversal,
    ) -> Result<usize, ClipboardError> {
        self.capture(scene, root, traversal).map(|_| self.len())
    }

    /// Copy, then delete the root entities the capture started from.
    ///
    /// The context captured around them stays in the scene. Nothing is
    /// deleted if any root is read-only.
    pub fn cut(
        &mut self,
        scene: &mut dyn Scene,
        root: Root,
        traversal: Traversal,
    ) -> Result<usize, ClipboardError> {
        let starts = self.capture(scene, root, traversal)?;
        let doomed: Vec<EntityId> = starts
            .into_iter()
            .filter(|&id| scene.type_of(id) != Some(MESH_TYPE))
            .collect();
        if let Some(&locked) = doomed.iter().find(|&&id| scene.is_read_only(id)) {
            return Err(SceneError::ReadOnly(scene.describe(locked)).into());
        }
        for id in doomed {
            tracing::debug!(entity = %scene.describe(id), "cutting");
            scene.delete_entity(id)?;
        }
        Ok(self.len())
    }

    /// Build a fresh copy of the contents into `scene`.
    pub fn paste(
        &self,
        scene: &mut dyn Scene,
        options: &BuildOptions,
    ) -> Result<BuildReport, ClipboardError> {
        let contents = self.contents.as_ref().ok_or(ClipboardError::Empty)?;
        let mut builder = Builder::from_bundle(Arc::clone(&self.registry), contents.clone());
        let report = builder.build(scene, options)?;
        tracing::info!(built = report.built.len(), failed = report.failed.len(), "pasted");
        Ok(report)
    }

    fn len(&self) -> usize {
        self.contents.as_ref().map_or(0, Bundle::len)
    }

    /// Capture into a fresh bundle; returns the entities capture started
    /// from.
    fn capture(
        &mut self,
        scene: &dyn Scene,
        root: Root,
        traversal: Traversal,
    ) -> Result<Vec<EntityId>, ClipboardError> {
        let starts = match &root {
            Root::Named(name) => scene.find(name).into_iter().collect(),
            Root::Selection => scene.selection(),
        };
        let mut builder = Builder::with_registry(Arc::clone(&self.registry));
        match builder.retrieve(scene, root, traversal) {
            Retrieval::Captured { .. } => {}
            Retrieval::NothingSelected => return Err(ClipboardError::NothingSelected),
            Retrieval::RootNotFound(name) => return Err(ClipboardError::RootNotFound(name)),
        }
        self.contents = Some(builder.into_bundle());
        self.origin = Some(scene.host_info());
        Ok(starts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryScene;
    use crate::test_utils::arm_rig;

    #[test]
    fn paste_on_empty_clipboard_fails() {
        let clipboard = Clipboard::default();
        let mut scene = MemoryScene::new();
        assert!(matches!(
            clipboard.paste(&mut scene, &BuildOptions::default()),
            Err(ClipboardError::Empty)
        ));
    }

    #[test]
    fn copy_then_paste_twice_into_fresh_scenes() {
        let source = arm_rig();
        let mut clipboard = Clipboard::default();
        let n = clipboard
            .copy(&source, Root::Named("solver".into()), Traversal::Closure)
            .unwrap();
        assert_eq!(n, 7);
        assert_eq!(clipboard.origin(), Some(source.host_info().as_str()));

        for _ in 0..2 {
            let mut target = MemoryScene::new();
            let report = clipboard.paste(&mut target, &BuildOptions::default()).unwrap();
            assert_eq!(report.built.len(), 7);
            assert_eq!(target.entity_count(), source.entity_count());
        }
        assert_eq!(clipboard.contents().map(Bundle::len), Some(7));
    }

    #[test]
    fn cut_removes_only_the_root_and_paste_restores_it() {
        let mut scene = arm_rig();
        let connections = scene.connection_count();
        let mut clipboard = Clipboard::default();
        clipboard
            .cut(&mut scene, Root::Named("l_arm_fiber".into()), Traversal::Immediate)
            .unwrap();
        assert!(scene.find("l_arm_fiber").is_none());
        assert!(scene.find("l_arm_tissue").is_some());
        assert!(scene.connection_count() < connections);

        clipboard.paste(&mut scene, &BuildOptions::default()).unwrap();
        assert!(scene.find("l_arm_fiber").is_some());
        assert_eq!(scene.connection_count(), connections);
    }

    #[test]
    fn cutting_a_read_only_entity_is_a_hard_error() {
        let mut scene = arm_rig();
        let fiber = scene.find("l_arm_fiber").unwrap();
        scene.set_read_only(fiber, true).unwrap();
        let mut clipboard = Clipboard::default();
        let err = clipboard
            .cut(&mut scene, Root::Named("l_arm_fiber".into()), Traversal::Immediate)
            .unwrap_err();
        assert!(matches!(err, ClipboardError::Scene(SceneError::ReadOnly(name)) if name == "l_arm_fiber"));
        assert!(scene.find("l_arm_fiber").is_some());
    }

    #[test]
    fn copy_reports_missing_roots() {
        let scene = arm_rig();
        let mut clipboard = Clipboard::default();
        assert!(matches!(
            clipboard.copy(&scene, Root::Selection, Traversal::Closure),
            Err(ClipboardError::NothingSelected)
        ));
        assert!(matches!(
            clipboard.copy(&scene, Root::Named("ghost".into()), Traversal::Closure),
            Err(ClipboardError::RootNotFound(_))
        ));
        assert!(clipboard.is_empty());
    }
}
