//! The resource tree.
//!
//! A hierarchy of named entries stored in a flat arena: `EntryId` is an
//! index into the slot vector, child lists are kept in insertion order, and
//! freed slots are recycled through a free list. Inputs, Outputs,
//! Observations and Placeholders are entries carrying a resource body;
//! Namespaces are entries without one.
//!
//! Deleted entries may be retained as tombstones (namespace-kind entries
//! with the deleted flag) so that the next snapshot can report the
//! deletion; they are released when the snapshot flushes deletions.
//!
//! Apps create I/O resources under their own `/app/<name>` namespace;
//! Observations all live under `/obs`.

use crate::error::{HubError, Result};
use crate::resource::ResourceBody;
use crate::types::{validate_path, EntryType, MAX_RESOURCE_PATH_BYTES};

/// Index of an entry in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) u32);

impl EntryId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// What an entry holds: nothing (Namespace) or a resource body.
pub(crate) enum EntryKind {
    Namespace,
    Resource(ResourceBody),
}

/// A single node in the resource tree.
pub(crate) struct Entry {
    pub name: String,
    pub parent: Option<EntryId>,
    /// Child ids in insertion order.
    pub children: Vec<EntryId>,
    pub kind: EntryKind,
    /// Created after the last snapshot scan.
    pub is_new: bool,
    /// Included in the snapshot currently being generated.
    pub relevant: bool,
    /// Tombstone: deleted but retained until the next snapshot flush.
    pub deleted: bool,
    /// Newness must be cleared when the current snapshot completes.
    pub clear_newness: bool,
}

impl Entry {
    pub fn entry_type(&self) -> EntryType {
        match &self.kind {
            EntryKind::Namespace => EntryType::Namespace,
            EntryKind::Resource(body) => body.entry_type(),
        }
    }

    pub fn resource(&self) -> Option<&ResourceBody> {
        match &self.kind {
            EntryKind::Resource(body) => Some(body),
            EntryKind::Namespace => None,
        }
    }

    pub fn resource_mut(&mut self) -> Option<&mut ResourceBody> {
        match &mut self.kind {
            EntryKind::Resource(body) => Some(body),
            EntryKind::Namespace => None,
        }
    }
}

/// Outcome of a create-or-promote operation at an existing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Promotion {
    pub id: EntryId,
    /// False when the operation was an idempotent re-create.
    pub created: bool,
}

/// Flat-arena resource tree.
pub(crate) struct ResTree {
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
    root: EntryId,
}

impl ResTree {
    pub fn new() -> ResTree {
        let mut tree = ResTree {
            slots: Vec::new(),
            free: Vec::new(),
            root: EntryId(0),
        };
        tree.root = tree.alloc(Entry {
            name: String::new(),
            parent: None,
            children: Vec::new(),
            kind: EntryKind::Namespace,
            is_new: false,
            relevant: false,
            deleted: false,
            clear_newness: false,
        });
        tree
    }

    pub fn root(&self) -> EntryId {
        self.root
    }

    fn alloc(&mut self, entry: Entry) -> EntryId {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(entry);
            EntryId(slot)
        } else {
            self.slots.push(Some(entry));
            EntryId((self.slots.len() - 1) as u32)
        }
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        self.slots[id.index()]
            .as_ref()
            .expect("stale entry id")
    }

    pub fn entry_mut(&mut self, id: EntryId) -> &mut Entry {
        self.slots[id.index()]
            .as_mut()
            .expect("stale entry id")
    }

    pub fn entry_type(&self, id: EntryId) -> EntryType {
        self.entry(id).entry_type()
    }

    pub fn is_resource(&self, id: EntryId) -> bool {
        matches!(self.entry(id).kind, EntryKind::Resource(_))
    }

    pub fn resource(&self, id: EntryId) -> Option<&ResourceBody> {
        self.entry(id).resource()
    }

    pub fn resource_mut(&mut self, id: EntryId) -> Option<&mut ResourceBody> {
        self.entry_mut(id).resource_mut()
    }

    /// Find a child entry by name, optionally including tombstones.
    pub fn find_child(&self, ns: EntryId, name: &str, with_tombstones: bool) -> Option<EntryId> {
        self.entry(ns)
            .children
            .iter()
            .copied()
            .find(|&c| {
                let child = self.entry(c);
                child.name == name && (with_tombstones || !child.deleted)
            })
    }

    /// First child of an entry, optionally including tombstones.
    pub fn first_child(&self, id: EntryId, with_tombstones: bool) -> Option<EntryId> {
        self.entry(id)
            .children
            .iter()
            .copied()
            .find(|&c| with_tombstones || !self.entry(c).deleted)
    }

    /// Next sibling of an entry, optionally including tombstones.
    pub fn next_sibling(&self, id: EntryId, with_tombstones: bool) -> Option<EntryId> {
        let parent = self.entry(id).parent?;
        let siblings = &self.entry(parent).children;
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings[pos + 1..]
            .iter()
            .copied()
            .find(|&c| with_tombstones || !self.entry(c).deleted)
    }

    /// Live children of an entry, in insertion order.
    pub fn children(&self, id: EntryId) -> Vec<EntryId> {
        self.entry(id)
            .children
            .iter()
            .copied()
            .filter(|&c| !self.entry(c).deleted)
            .collect()
    }

    /// Pre-order walk of the subtree rooted at `from`.
    pub fn walk(&self, from: EntryId, with_tombstones: bool) -> Vec<EntryId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let entry = self.entry(id);
            if !with_tombstones && entry.deleted {
                continue;
            }
            out.push(id);
            // Reverse so the first child is popped first.
            for &child in entry.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Resolve a path relative to a base entry, without creating anything.
    ///
    /// Returns `None` on a missing entry or a malformed path.
    pub fn find_entry(&self, base: EntryId, path: &str) -> Option<EntryId> {
        if let Err(e) = validate_path(path) {
            tracing::error!("{}", e);
            return None;
        }
        let mut current = base;
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return Some(current);
        }
        for segment in relative.split('/') {
            current = self.find_child(current, segment, false)?;
        }
        Some(current)
    }

    /// Resolve an absolute path. The path must start with `/`.
    pub fn find_absolute(&self, path: &str) -> Option<EntryId> {
        if !path.starts_with('/') {
            tracing::error!("path '{}' not absolute", path);
            return None;
        }
        self.find_entry(self.root, &path[1..])
    }

    /// Get the entry at a path, creating intermediate Namespaces (and the
    /// final entry, as a Namespace) as needed. Tombstones along the way are
    /// resurrected.
    pub fn get_entry(&mut self, base: EntryId, path: &str) -> Result<EntryId> {
        validate_path(path)?;
        let mut current = base;
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(current);
        }
        let segments: Vec<String> = relative.split('/').map(str::to_string).collect();
        for segment in segments {
            current = match self.find_child(current, &segment, true) {
                Some(child) if !self.entry(child).deleted => child,
                Some(tombstone) => {
                    self.resurrect(tombstone);
                    tombstone
                }
                None => self.add_child(current, &segment),
            };
        }
        Ok(current)
    }

    fn add_child(&mut self, parent: EntryId, name: &str) -> EntryId {
        let id = self.alloc(Entry {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            kind: EntryKind::Namespace,
            is_new: true,
            relevant: false,
            deleted: false,
            clear_newness: false,
        });
        self.entry_mut(parent).children.push(id);
        id
    }

    /// Bring a tombstone back to life as a fresh Namespace entry.
    fn resurrect(&mut self, id: EntryId) {
        let entry = self.entry_mut(id);
        debug_assert!(matches!(entry.kind, EntryKind::Namespace));
        entry.deleted = false;
        entry.is_new = true;
        entry.relevant = false;
        entry.clear_newness = false;
    }

    /// Get the resource at a path, creating a Placeholder if a Namespace
    /// (or nothing) is there.
    pub fn get_resource(&mut self, base: EntryId, path: &str) -> Result<EntryId> {
        let id = self.get_entry(base, path)?;
        if matches!(self.entry(id).kind, EntryKind::Namespace) {
            self.replace_resource(id, ResourceBody::new_placeholder());
        }
        Ok(id)
    }

    /// Replace whatever body an entry holds with a new one, migrating admin
    /// settings from the old body.
    fn replace_resource(&mut self, id: EntryId, mut body: ResourceBody) {
        let entry = self.entry_mut(id);
        let old = std::mem::replace(&mut entry.kind, EntryKind::Namespace);
        if let EntryKind::Resource(old_body) = old {
            ResourceBody::move_admin_settings(old_body, &mut body);
        }
        entry.kind = EntryKind::Resource(body);
    }

    /// Create an Input at a path, applying the promotion rules.
    pub fn create_input(
        &mut self,
        base: EntryId,
        path: &str,
        data_type: crate::types::DataType,
        units: &str,
    ) -> Result<Promotion> {
        self.create_io(base, path, data_type, units, false)
    }

    /// Create an Output at a path, applying the promotion rules.
    pub fn create_output(
        &mut self,
        base: EntryId,
        path: &str,
        data_type: crate::types::DataType,
        units: &str,
    ) -> Result<Promotion> {
        self.create_io(base, path, data_type, units, true)
    }

    fn create_io(
        &mut self,
        base: EntryId,
        path: &str,
        data_type: crate::types::DataType,
        units: &str,
        is_output: bool,
    ) -> Result<Promotion> {
        let id = self.get_entry(base, path)?;
        let wanted = if is_output {
            EntryType::Output
        } else {
            EntryType::Input
        };

        match self.entry_type(id) {
            EntryType::Namespace | EntryType::Placeholder => {
                let body = if is_output {
                    ResourceBody::new_output(data_type, units)
                } else {
                    ResourceBody::new_input(data_type, units)
                };
                self.replace_resource(id, body);
                Ok(Promotion { id, created: true })
            }
            existing if existing == wanted => {
                // Idempotent success when type and units match exactly.
                let body = self.resource(id).expect("I/O entry without body");
                if body.data_type() == data_type && body.units == units {
                    Ok(Promotion { id, created: false })
                } else {
                    Err(HubError::Duplicate(format!(
                        "'{}' already exists with different type or units",
                        path
                    )))
                }
            }
            existing => Err(HubError::Duplicate(format!(
                "attempt to replace {} '{}' with an {}",
                existing.name(),
                path,
                wanted.name()
            ))),
        }
    }

    /// Get or create an Observation at a path.
    pub fn get_observation(&mut self, base: EntryId, path: &str) -> Result<Promotion> {
        let id = self.get_entry(base, path)?;
        match self.entry_type(id) {
            EntryType::Namespace | EntryType::Placeholder => {
                self.replace_resource(id, ResourceBody::new_observation());
                Ok(Promotion { id, created: true })
            }
            EntryType::Observation => Ok(Promotion { id, created: false }),
            existing => Err(HubError::Duplicate(format!(
                "attempt to replace {} '{}' with an observation",
                existing.name(),
                path
            ))),
        }
    }

    /// Get the path of an entry relative to a base namespace.
    ///
    /// The result is assembled whole before being returned: on `Overflow`
    /// or `NotFound` nothing is partially committed.
    pub fn get_path(&self, base: EntryId, entry: EntryId) -> Result<String> {
        if entry == base {
            return Ok(String::new());
        }
        let mut names = Vec::new();
        let mut current = entry;
        while current != base {
            let node = self.entry(current);
            match node.parent {
                Some(parent) => {
                    names.push(node.name.clone());
                    current = parent;
                }
                // Reached the root without passing through the base.
                None => return Err(HubError::NotFound),
            }
        }
        names.reverse();
        let mut path = if base == self.root {
            "/".to_string()
        } else {
            String::new()
        };
        path.push_str(&names.join("/"));
        if path.len() > MAX_RESOURCE_PATH_BYTES {
            return Err(HubError::Overflow);
        }
        Ok(path)
    }

    /// Absolute path of an entry.
    pub fn absolute_path(&self, entry: EntryId) -> String {
        self.get_path(self.root, entry).unwrap_or_default()
    }

    /// Attach a resource body to an entry, replacing whatever it held.
    pub fn attach_body(&mut self, id: EntryId, body: ResourceBody) {
        self.entry_mut(id).kind = EntryKind::Resource(body);
    }

    /// Turn a resource entry back into a plain Namespace, returning the
    /// detached body.
    pub fn detach_body(&mut self, id: EntryId) -> Option<ResourceBody> {
        let entry = self.entry_mut(id);
        match std::mem::replace(&mut entry.kind, EntryKind::Namespace) {
            EntryKind::Resource(body) => Some(body),
            EntryKind::Namespace => None,
        }
    }

    /// Record the deletion of an entry that has just become a bare
    /// Namespace: tombstone it if deletion tracking wants a record, free it
    /// otherwise. Entries that still have children stay as Namespaces.
    pub fn record_deletion(&mut self, id: EntryId, track_deletions: bool) {
        let entry = self.entry(id);
        if !entry.children.is_empty() {
            return;
        }
        if track_deletions && !entry.is_new {
            self.entry_mut(id).deleted = true;
        } else {
            self.free_entry(id);
        }
    }

    /// Release a childless entry. Ancestor Namespaces stay in place even
    /// when left empty; live entry ids held by services must keep
    /// resolving.
    pub fn free_entry(&mut self, id: EntryId) {
        debug_assert!(self.entry(id).children.is_empty());
        if let Some(parent) = self.entry(id).parent {
            self.entry_mut(parent).children.retain(|&c| c != id);
        }
        self.slots[id.index()] = None;
        self.free.push(id.0);
    }

    /// All tombstones in the tree.
    pub fn tombstones(&self) -> Vec<EntryId> {
        self.walk(self.root, true)
            .into_iter()
            .filter(|&id| self.entry(id).deleted)
            .collect()
    }

    /// Release every tombstone (used when a snapshot flushes deletions or
    /// deletion tracking is disabled).
    pub fn flush_tombstones(&mut self) {
        for id in self.tombstones() {
            self.free_entry(id);
        }
    }
}
