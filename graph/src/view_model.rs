use anyhow::anyhow;
use common::Toggle;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityChange {
    pub layer: String,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
}

/// Layer name to visibility flag. Presenters subscribe to changes instead
/// of sharing map state.
#[derive(Debug)]
pub struct LayerViewModel {
    layers: Mutex<Vec<Layer>>,
    tx: broadcast::Sender<VisibilityChange>,
}

impl Default for LayerViewModel {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            layers: Mutex::new(Vec::new()),
            tx,
        }
    }
}

impl LayerViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer, or resets the visibility of an existing one.
    pub fn add_layer(&self, name: &str, visible: bool) {
        let mut layers = self.layers.lock();
        match layers.iter_mut().find(|layer| layer.name == name) {
            Some(layer) => layer.visible = visible,
            None => layers.push(Layer {
                name: name.to_string(),
                visible,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VisibilityChange> {
        self.tx.subscribe()
    }

    pub fn is_visible(&self, name: &str) -> Option<bool> {
        self.layers
            .lock()
            .iter()
            .find(|layer| layer.name == name)
            .map(|layer| layer.visible)
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.layers.lock().clone()
    }

    pub fn visible_layers(&self) -> Vec<String> {
        self.layers
            .lock()
            .iter()
            .filter(|layer| layer.visible)
            .map(|layer| layer.name.clone())
            .collect()
    }

    /// Returns whether the flag changed; subscribers hear only real changes.
    pub fn set_visible(&self, name: &str, visible: bool) -> anyhow::Result<bool> {
        let changed = {
            let mut layers = self.layers.lock();
            let layer = layers
                .iter_mut()
                .find(|layer| layer.name == name)
                .ok_or_else(|| anyhow!("Unknown layer {name:?}"))?;
            let changed = layer.visible != visible;
            layer.visible = visible;
            changed
        };
        if changed {
            self.notify(name, visible);
        }
        Ok(changed)
    }

    /// Flips a layer and returns its new visibility.
    pub fn toggle(&self, name: &str) -> anyhow::Result<bool> {
        let visible = {
            let mut layers = self.layers.lock();
            let layer = layers
                .iter_mut()
                .find(|layer| layer.name == name)
                .ok_or_else(|| anyhow!("Unknown layer {name:?}"))?;
            layer.visible.toggle()
        };
        self.notify(name, visible);
        Ok(visible)
    }

    fn notify(&self, name: &str, visible: bool) {
        // no subscribers is fine
        let _ = self.tx.send(VisibilityChange {
            layer: name.to_string(),
            visible,
        });
    }
}
