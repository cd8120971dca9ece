use std::collections::BTreeSet;

use crate::{core::ScreenSize, layer::Layer};

/// Tracks the primary selection plus a multi-selection set and resolves
/// canvas clicks against the layer stack.
pub struct SelectionManager {
    primary: Option<String>,
    multi: BTreeSet<String>,
    on_change: Option<Box<dyn FnMut(Option<&str>)>>,
}

impl std::fmt::Debug for SelectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionManager")
            .field("primary", &self.primary)
            .field("multi", &self.multi)
            .finish()
    }
}

impl Default for SelectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionManager {
    pub fn new() -> Self {
        Self {
            primary: None,
            multi: BTreeSet::new(),
            on_change: None,
        }
    }

    pub fn on_change(&mut self, cb: impl FnMut(Option<&str>) + 'static) {
        self.on_change = Some(Box::new(cb));
    }

    pub fn primary(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn selected(&self) -> impl Iterator<Item = &str> {
        self.multi.iter().map(String::as_str)
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.multi.contains(name)
    }

    /// Select a sprite. With `multi` the name toggles in and out of the
    /// set; without, it becomes the sole selection. `notify` is false for
    /// sync updates driven by the host so no feedback loop forms.
    pub fn select(&mut self, name: &str, multi: bool, notify: bool) {
        if multi {
            if self.multi.remove(name) {
                if self.primary.as_deref() == Some(name) {
                    self.primary = self.multi.iter().next_back().cloned();
                }
            } else {
                self.multi.insert(name.to_string());
                self.primary = Some(name.to_string());
            }
        } else {
            self.multi.clear();
            self.multi.insert(name.to_string());
            self.primary = Some(name.to_string());
        }
        if notify {
            self.notify();
        }
    }

    pub fn deselect_all(&mut self, notify: bool) {
        if self.primary.is_none() && self.multi.is_empty() {
            return;
        }
        self.primary = None;
        self.multi.clear();
        if notify {
            self.notify();
        }
    }

    /// Drop names that no longer exist (scene reconciliation).
    pub fn retain_known(&mut self, known: impl Fn(&str) -> bool) {
        self.multi.retain(|n| known(n));
        if let Some(p) = &self.primary
            && !known(p)
        {
            self.primary = self.multi.iter().next_back().cloned();
            self.notify();
        }
    }

    /// Scan from topmost to bottommost visible non-background layer and
    /// return the first hit. `layers` is in draw (z ascending) order.
    pub fn resolve_click<'a>(
        &self,
        world_x: f64,
        world_y: f64,
        layers: &'a [Layer],
        screen: ScreenSize,
    ) -> Option<&'a str> {
        layers
            .iter()
            .rev()
            .filter(|l| l.visible && !l.is_background())
            .find(|l| l.contains_point(world_x, world_y, screen))
            .map(|l| l.name())
    }

    fn notify(&mut self) {
        if let Some(cb) = &mut self.on_change {
            cb(self.primary.as_deref());
        }
    }
}
