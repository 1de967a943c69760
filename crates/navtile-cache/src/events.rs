//! Scene events emitted by the dynamic navigation mesh.

use glam::Vec3;
use navtile_common::BoundingBox;

use crate::cache::ObstacleRef;

/// Notification about a navigation mesh change.
#[derive(Debug, Clone)]
pub enum NavEvent {
    /// The whole mesh was rebuilt or reallocated.
    MeshRebuilt,
    /// One tile column was built or rebuilt.
    TileAdded {
        /// Tile column coordinates.
        tile: (i32, i32),
    },
    /// A partial rebuild of the given world region finished.
    AreaRebuilt {
        /// Bounds of the rebuilt region.
        bounds: BoundingBox,
    },
    /// An obstacle was added to the cache.
    ObstacleAdded {
        /// Reference of the obstacle.
        obstacle: ObstacleRef,
        /// Obstacle position.
        position: Vec3,
        /// Obstacle radius.
        radius: f32,
        /// Obstacle height.
        height: f32,
    },
    /// An obstacle was removed from the cache.
    ObstacleRemoved {
        /// Reference the obstacle had while live.
        obstacle: ObstacleRef,
        /// Obstacle position.
        position: Vec3,
        /// Obstacle radius.
        radius: f32,
        /// Obstacle height.
        height: f32,
    },
}

/// Handle returned when registering an observer; keep it to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverHandle(pub(crate) u64);

pub(crate) struct ObserverSet {
    observers: Vec<(u64, Box<dyn FnMut(&NavEvent)>)>,
    next_id: u64,
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("count", &self.observers.len())
            .finish()
    }
}

impl ObserverSet {
    pub(crate) fn new() -> Self {
        Self {
            observers: Vec::new(),
            next_id: 1,
        }
    }

    pub(crate) fn register(&mut self, observer: Box<dyn FnMut(&NavEvent)>) -> ObserverHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, observer));
        ObserverHandle(id)
    }

    pub(crate) fn unregister(&mut self, handle: ObserverHandle) {
        self.observers.retain(|(id, _)| *id != handle.0);
    }

    pub(crate) fn notify(&mut self, event: &NavEvent) {
        for (_, observer) in &mut self.observers {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_register_notify_unregister() {
        let seen = Rc::new(RefCell::new(0));
        let mut set = ObserverSet::new();

        let seen_clone = Rc::clone(&seen);
        let handle = set.register(Box::new(move |_| {
            *seen_clone.borrow_mut() += 1;
        }));

        set.notify(&NavEvent::MeshRebuilt);
        assert_eq!(*seen.borrow(), 1);

        set.unregister(handle);
        set.notify(&NavEvent::MeshRebuilt);
        assert_eq!(*seen.borrow(), 1);
    }
}
