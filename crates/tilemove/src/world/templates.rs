//! Template maps: the name registry, the loaded library and the background
//! preload task that fills it.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::content::{ContentError, MapData, MapDirectory};

use super::event::EventDefinition;

/// A named template: an event on some template map, plus optional host
/// hooks run around lifecycle operations that use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub map_id: u32,
    pub event_id: u32,
    #[serde(default)]
    pub pre_hook: Option<u32>,
    #[serde(default)]
    pub post_hook: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateRegistry {
    entries: BTreeMap<String, TemplateEntry>,
}

impl TemplateRegistry {
    pub fn insert(&mut self, name: impl Into<String>, entry: TemplateEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&TemplateEntry> {
        self.entries.get(name)
    }

    /// Distinct template maps the registry refers to.
    pub fn map_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.entries.values().map(|entry| entry.map_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Template maps that finished loading.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    maps: BTreeMap<u32, MapData>,
}

impl TemplateLibrary {
    pub fn insert(&mut self, map: MapData) {
        self.maps.insert(map.id, map);
    }

    pub fn is_loaded(&self, map_id: u32) -> bool {
        self.maps.contains_key(&map_id)
    }

    pub fn event(&self, map_id: u32, event_id: u32) -> Option<&EventDefinition> {
        self.maps.get(&map_id)?.events.get(&event_id)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

/// Anything that can produce a map by id on a worker thread.
pub trait MapSource: Send + 'static {
    fn load_map(&self, map_id: u32) -> Result<MapData, ContentError>;
}

impl MapSource for MapDirectory {
    fn load_map(&self, map_id: u32) -> Result<MapData, ContentError> {
        self.load(map_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadStatus {
    Pending { remaining: usize },
    Complete { loaded: usize, failed: usize },
}

type PreloadMessage = (u32, Result<MapData, ContentError>);

/// Loads template maps off the tick thread. Results arrive through a
/// channel and are moved into a [`TemplateLibrary`] by `poll` or `wait`.
#[derive(Debug)]
pub struct TemplatePreload {
    receiver: Receiver<PreloadMessage>,
    worker: Option<JoinHandle<()>>,
    remaining: usize,
    loaded: usize,
    failed: usize,
}

impl TemplatePreload {
    pub fn start<S: MapSource>(source: S, map_ids: impl IntoIterator<Item = u32>) -> Self {
        let map_ids: Vec<u32> = map_ids.into_iter().collect();
        let remaining = map_ids.len();
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("template-preload".to_string())
            .spawn(move || {
                for map_id in map_ids {
                    if sender.send((map_id, source.load_map(map_id))).is_err() {
                        break;
                    }
                }
            });
        let (worker, remaining, failed) = match worker {
            Ok(handle) => (Some(handle), remaining, 0),
            Err(error) => {
                warn!(error = %error, "template_preload_spawn_failed");
                (None, 0, remaining)
            }
        };
        Self {
            receiver,
            worker,
            remaining,
            loaded: 0,
            failed,
        }
    }

    /// Moves every finished map into `library` without blocking.
    pub fn poll(&mut self, library: &mut TemplateLibrary) -> PreloadStatus {
        while self.remaining > 0 {
            match self.receiver.try_recv() {
                Ok(message) => self.accept(message, library),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.failed += self.remaining;
                    self.remaining = 0;
                }
            }
        }
        self.status()
    }

    /// Blocks until every requested map has arrived or failed.
    pub fn wait(mut self, library: &mut TemplateLibrary) -> PreloadStatus {
        while self.remaining > 0 {
            match self.receiver.recv() {
                Ok(message) => self.accept(message, library),
                Err(_) => {
                    self.failed += self.remaining;
                    self.remaining = 0;
                }
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("template_preload_worker_panicked");
            }
        }
        self.status()
    }

    fn accept(&mut self, (map_id, result): PreloadMessage, library: &mut TemplateLibrary) {
        self.remaining -= 1;
        match result {
            Ok(map) => {
                info!(map_id, events = map.events.len(), "template_map_loaded");
                library.insert(map);
                self.loaded += 1;
            }
            Err(error) => {
                warn!(map_id, error = %error, "template_map_load_failed");
                self.failed += 1;
            }
        }
    }

    fn status(&self) -> PreloadStatus {
        if self.remaining > 0 {
            PreloadStatus::Pending {
                remaining: self.remaining,
            }
        } else {
            PreloadStatus::Complete {
                loaded: self.loaded,
                failed: self.failed,
            }
        }
    }
}
