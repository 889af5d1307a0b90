//! Per-session tool registry.
//!
//! Maps tool names to definitions in insertion order. Every mutation after
//! the initial load bumps a revision counter, which the server handler uses
//! to decide whether a `tools/list_changed` notification is due.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::types::ToolDefinition;

pub struct ToolRegistry {
    tools: RwLock<IndexMap<String, Arc<ToolDefinition>>>,
    revision: AtomicU64,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(IndexMap::new()),
            revision: AtomicU64::new(0),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Initial load. Does not count as a change.
    pub fn bulk_upsert<I>(&self, tools: I) -> usize
    where
        I: IntoIterator<Item = Arc<ToolDefinition>>,
    {
        let mut map = self.tools.write();
        let mut count = 0;
        for tool in tools {
            debug!("Loaded tool: {} (tool: {})", tool.display_label, tool.name);
            map.insert(tool.name.clone(), tool);
            count += 1;
        }
        count
    }

    /// Insert or replace tools after the initial load.
    pub fn upsert<I>(&self, tools: I) -> usize
    where
        I: IntoIterator<Item = Arc<ToolDefinition>>,
    {
        let mut map = self.tools.write();
        let mut count = 0;
        for tool in tools {
            info!(
                "Added/Updated tool: {} (tool: {})",
                tool.display_label, tool.name
            );
            map.insert(tool.name.clone(), tool);
            count += 1;
        }
        self.revision.fetch_add(1, Ordering::SeqCst);
        count
    }

    /// Remove a tool by name. Counts as a change even when nothing was removed.
    pub fn remove(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        let removed = self.tools.write().shift_remove(name);
        self.revision.fetch_add(1, Ordering::SeqCst);
        if removed.is_some() {
            info!("Removed tool: {}", name);
        } else {
            debug!("Remove requested for unknown tool: {}", name);
        }
        removed
    }

    /// Count a change that left the tools as they were.
    pub fn touch(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Snapshot of every tool in insertion order.
    pub fn list(&self) -> Vec<Arc<ToolDefinition>> {
        self.tools.read().values().cloned().collect()
    }

    /// Look up by tool name, falling back to the display label.
    pub fn find(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        let map = self.tools.read();
        map.get(name)
            .or_else(|| map.values().find(|tool| tool.display_label == name))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Number of mutations since the initial load.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}
