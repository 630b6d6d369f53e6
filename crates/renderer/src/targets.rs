//! Offscreen color targets, one per active layer slot.
//!
//! Slots that were requested but failed to allocate stay requested, so the
//! next `resize` retries them.
use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::GraphicsBackend;
use crate::types::{BackendError, FramebufferHandle, TextureHandle};

/// Sampling units available to the compositor for layer textures.
pub const MAX_LAYER_SLOTS: usize = 5;

#[derive(Debug, Error)]
pub enum TargetAllocationError {
    #[error("slot {slot} exceeds the {max} available layer slots")]
    SlotOutOfRange { slot: usize, max: usize },
    #[error("failed to allocate target texture: {0}")]
    Texture(#[source] BackendError),
    #[error("failed to allocate framebuffer: {0}")]
    Framebuffer(#[source] BackendError),
    #[error("failed to attach target texture: {0}")]
    Attachment(#[source] BackendError),
    #[error("framebuffer for slot {slot} is incomplete")]
    Incomplete { slot: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffscreenTarget {
    pub slot_id: usize,
    pub framebuffer: FramebufferHandle,
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
pub struct OffscreenTargetManager {
    requested: BTreeSet<usize>,
    targets: BTreeMap<usize, OffscreenTarget>,
}

impl OffscreenTargetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a `width`x`height` target for `slot_id`, replacing any
    /// existing one. On failure nothing stays allocated and `None` is returned.
    pub fn create_target<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        slot_id: usize,
        width: u32,
        height: u32,
    ) -> Option<OffscreenTarget> {
        self.destroy(backend, slot_id);
        self.requested.insert(slot_id);
        match allocate(backend, slot_id, width, height) {
            Ok(target) => {
                debug!(slot = slot_id, width, height, "allocated offscreen target");
                self.targets.insert(slot_id, target);
                Some(target)
            }
            Err(err) => {
                warn!(slot = slot_id, error = %err, "offscreen target unavailable");
                None
            }
        }
    }

    /// Makes `slot_id` the current render target. Returns false for slots
    /// without an allocated target.
    pub fn bind<B: GraphicsBackend + ?Sized>(&self, backend: &mut B, slot_id: usize) -> bool {
        match self.targets.get(&slot_id) {
            Some(target) => {
                backend.bind_framebuffer(Some(target.framebuffer));
                backend.set_viewport(target.width, target.height);
                true
            }
            None => false,
        }
    }

    /// Restores the visible surface as the render target.
    pub fn unbind<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.bind_framebuffer(None);
    }

    pub fn texture_of(&self, slot_id: usize) -> Option<TextureHandle> {
        self.targets.get(&slot_id).map(|target| target.texture)
    }

    pub fn target(&self, slot_id: usize) -> Option<&OffscreenTarget> {
        self.targets.get(&slot_id)
    }

    /// Tears down every target and rebuilds each requested slot at the new
    /// size.
    pub fn resize<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B, width: u32, height: u32) {
        let slots: Vec<usize> = self.requested.iter().copied().collect();
        for slot in &slots {
            self.destroy(backend, *slot);
        }
        for slot in slots {
            self.create_target(backend, slot, width, height);
        }
    }

    /// Requests slots `0..count` (capped at `MAX_LAYER_SLOTS`) and drops any
    /// slot at or above `count`. Missing or differently sized targets are
    /// allocated at `width`x`height`.
    pub fn ensure_slots<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        count: usize,
        width: u32,
        height: u32,
    ) {
        let count = count.min(MAX_LAYER_SLOTS);
        let stale: Vec<usize> = self.requested.range(count..).copied().collect();
        for slot in stale {
            self.destroy(backend, slot);
            self.requested.remove(&slot);
        }
        for slot in 0..count {
            let current = self.targets.get(&slot);
            if current.map(|t| (t.width, t.height)) != Some((width, height)) {
                self.create_target(backend, slot, width, height);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn requested_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.requested.iter().copied()
    }

    /// Destroys every target and forgets every requested slot.
    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        let slots: Vec<usize> = self.targets.keys().copied().collect();
        for slot in slots {
            self.destroy(backend, slot);
        }
        self.requested.clear();
    }

    fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B, slot_id: usize) {
        if let Some(target) = self.targets.remove(&slot_id) {
            backend.delete_framebuffer(target.framebuffer);
            backend.delete_texture(target.texture);
        }
    }
}

fn allocate<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    slot_id: usize,
    width: u32,
    height: u32,
) -> Result<OffscreenTarget, TargetAllocationError> {
    if slot_id >= MAX_LAYER_SLOTS {
        return Err(TargetAllocationError::SlotOutOfRange {
            slot: slot_id,
            max: MAX_LAYER_SLOTS,
        });
    }
    let texture = backend
        .create_texture(width, height, None)
        .map_err(TargetAllocationError::Texture)?;
    let framebuffer = match backend.create_framebuffer() {
        Ok(framebuffer) => framebuffer,
        Err(err) => {
            backend.delete_texture(texture);
            return Err(TargetAllocationError::Framebuffer(err));
        }
    };

    let attached = backend
        .attach_color(framebuffer, texture)
        .map_err(TargetAllocationError::Attachment)
        .and_then(|()| {
            if backend.framebuffer_complete(framebuffer) {
                Ok(())
            } else {
                Err(TargetAllocationError::Incomplete { slot: slot_id })
            }
        });
    if let Err(err) = attached {
        backend.delete_framebuffer(framebuffer);
        backend.delete_texture(texture);
        return Err(err);
    }

    Ok(OffscreenTarget {
        slot_id,
        framebuffer,
        texture,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Call, RecordingBackend};

    #[test]
    fn creates_complete_target_of_exact_size() {
        let mut backend = RecordingBackend::new();
        let mut targets = OffscreenTargetManager::new();
        let target = targets.create_target(&mut backend, 0, 640, 360).unwrap();
        assert_eq!((target.width, target.height), (640, 360));
        assert_eq!(backend.texture_size(target.texture), Some((640, 360)));
        assert_eq!(targets.texture_of(0), Some(target.texture));
        assert_eq!(targets.texture_of(1), None);
    }

    #[test]
    fn failed_allocation_leaves_no_orphans() {
        let mut backend = RecordingBackend::new();
        backend.set_incomplete_framebuffers(true);
        let mut targets = OffscreenTargetManager::new();
        assert!(targets.create_target(&mut backend, 0, 64, 64).is_none());
        assert_eq!(backend.live_textures(), 0);
        assert_eq!(backend.live_framebuffers(), 0);

        backend.set_incomplete_framebuffers(false);
        backend.fail_next_textures(1);
        assert!(targets.create_target(&mut backend, 0, 64, 64).is_none());
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn slot_beyond_budget_is_rejected() {
        let mut backend = RecordingBackend::new();
        let mut targets = OffscreenTargetManager::new();
        assert!(targets
            .create_target(&mut backend, MAX_LAYER_SLOTS, 8, 8)
            .is_none());
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn bind_and_unbind() {
        let mut backend = RecordingBackend::new();
        let mut targets = OffscreenTargetManager::new();
        let target = targets.create_target(&mut backend, 2, 8, 8).unwrap();
        backend.take_calls();

        assert!(targets.bind(&mut backend, 2));
        assert!(!targets.bind(&mut backend, 3));
        targets.unbind(&mut backend);
        assert_eq!(
            backend.take_calls(),
            vec![
                Call::BindFramebuffer(Some(target.framebuffer)),
                Call::Viewport {
                    width: 8,
                    height: 8
                },
                Call::BindFramebuffer(None),
            ]
        );
    }

    #[test]
    fn resize_replaces_every_texture() {
        let mut backend = RecordingBackend::new();
        let mut targets = OffscreenTargetManager::new();
        targets.ensure_slots(&mut backend, 3, 100, 100);
        let before: Vec<_> = (0..3).map(|slot| targets.texture_of(slot).unwrap()).collect();

        targets.resize(&mut backend, 200, 50);
        for (slot, old) in before.into_iter().enumerate() {
            let new = targets.texture_of(slot).unwrap();
            assert_ne!(new, old);
            assert_eq!(backend.texture_size(new), Some((200, 50)));
        }
        assert_eq!(backend.live_textures(), 3);
        assert_eq!(backend.live_framebuffers(), 3);
    }

    #[test]
    fn resize_retries_failed_slots() {
        let mut backend = RecordingBackend::new();
        let mut targets = OffscreenTargetManager::new();
        backend.fail_next_textures(1);
        targets.ensure_slots(&mut backend, 2, 10, 10);
        assert_eq!(targets.len(), 1);
        assert!(targets.texture_of(0).is_none());

        targets.resize(&mut backend, 20, 20);
        assert_eq!(targets.len(), 2);
        assert!(targets.texture_of(0).is_some());
    }

    #[test]
    fn ensure_slots_shrinks_and_caps() {
        let mut backend = RecordingBackend::new();
        let mut targets = OffscreenTargetManager::new();
        targets.ensure_slots(&mut backend, 7, 10, 10);
        assert_eq!(targets.len(), MAX_LAYER_SLOTS);

        let kept = targets.texture_of(0);
        targets.ensure_slots(&mut backend, 2, 10, 10);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets.texture_of(0), kept);
        assert_eq!(targets.requested_slots().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(backend.live_textures(), 2);
    }

    #[test]
    fn release_is_idempotent() {
        let mut backend = RecordingBackend::new();
        let mut targets = OffscreenTargetManager::new();
        targets.ensure_slots(&mut backend, 2, 10, 10);
        targets.release(&mut backend);
        assert!(targets.is_empty());
        assert_eq!(backend.live_objects(), 0);
        targets.release(&mut backend);
        assert!(targets.is_empty());
    }
}
