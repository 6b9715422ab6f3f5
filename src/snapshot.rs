//! Snapshot and delta views of the resource tree.
//!
//! A snapshot streams an encoded view of a subtree into a writer. An entry
//! is included if it or any descendant is *relevant*: created since the
//! last scan, modified after the `since` timestamp, or a tombstone (when
//! deletion tracking is on). A successful scan clears the "new" and
//! "JSON example changed" flags; setting `flush_deletions` releases the
//! tombstones it reported.

use crate::error::{HubError, Result};
use crate::hub::Hub;
use crate::tree::{EntryId, ResTree};
use crate::types::EntryType;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Encoding of a snapshot stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    Json,
    Octave,
}

/// Parameters of a snapshot request.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Absolute path of the subtree to scan ("/" for the whole tree).
    pub root: String,
    /// Include entries modified after this timestamp.
    /// [`crate::types::BEGINNING_OF_TIME`] requests a full snapshot.
    pub since: f64,
    /// Release reported tombstones once the stream completes.
    pub flush_deletions: bool,
    pub format: SnapshotFormat,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        SnapshotOptions {
            root: "/".to_string(),
            since: crate::types::BEGINNING_OF_TIME,
            flush_deletions: false,
            format: SnapshotFormat::Json,
        }
    }
}

/// Stream a snapshot of the tree into `writer`.
///
/// On a write error the stream is terminated and the scan's flag-clearing
/// side effects are skipped; the error is the completion status.
pub fn write_snapshot(
    hub: &mut Hub,
    options: &SnapshotOptions,
    writer: &mut dyn Write,
) -> Result<()> {
    let root = if options.root == "/" || options.root.is_empty() {
        hub.tree().root()
    } else {
        hub.tree()
            .find_absolute(&options.root)
            .ok_or(HubError::NotFound)?
    };

    let tracking = hub.is_deletion_tracking();
    mark_relevance(hub.tree_mut(), root, options.since, tracking);

    let result = match options.format {
        SnapshotFormat::Json => {
            let doc = encode_json(hub.tree(), root);
            serde_json::to_writer(&mut *writer, &doc)
                .map_err(|e| HubError::Fault(format!("snapshot write failed: {}", e)))
        }
        SnapshotFormat::Octave => encode_octave(hub.tree(), root, options.since, writer),
    };
    result?;
    writer.flush()?;

    finish_scan(hub.tree_mut(), root, options.flush_deletions);
    Ok(())
}

/// Relevance pass: an entry is relevant if it is new, modified after
/// `since`, a tracked tombstone, or has a relevant descendant.
fn mark_relevance(tree: &mut ResTree, id: EntryId, since: f64, tracking: bool) -> bool {
    let children: Vec<EntryId> = tree.entry(id).children.clone();
    let mut relevant = false;
    for child in children {
        relevant |= mark_relevance(tree, child, since, tracking);
    }

    {
        let entry = tree.entry(id);
        if entry.deleted {
            relevant |= tracking;
        } else {
            relevant |= entry.is_new;
            if let Some(body) = entry.resource() {
                if let Some(current) = &body.current {
                    relevant |= current.timestamp() > since;
                }
            }
        }
    }

    let entry = tree.entry_mut(id);
    entry.relevant = relevant;
    if entry.is_new {
        entry.clear_newness = true;
    }
    relevant
}

/// Clear scan state after a successful stream.
fn finish_scan(tree: &mut ResTree, root: EntryId, flush_deletions: bool) {
    let mut tombstones = Vec::new();
    for id in tree.walk(root, true) {
        let entry = tree.entry_mut(id);
        entry.relevant = false;
        if entry.clear_newness {
            entry.is_new = false;
            entry.clear_newness = false;
        }
        if entry.deleted {
            tombstones.push(id);
        }
        if let Some(body) = entry.resource_mut() {
            body.json_example_changed = false;
        }
    }
    if flush_deletions {
        for id in tombstones {
            tree.free_entry(id);
        }
    }
}

/// Encode an entry (and its relevant descendants) as a JSON object.
fn encode_json(tree: &ResTree, id: EntryId) -> serde_json::Value {
    let entry = tree.entry(id);
    let mut obj = serde_json::Map::new();

    if entry.deleted {
        obj.insert("deleted".to_string(), serde_json::Value::Bool(true));
        return serde_json::Value::Object(obj);
    }

    let entry_type = entry.entry_type();
    obj.insert(
        "kind".to_string(),
        serde_json::Value::String(entry_type.name().to_string()),
    );

    if let Some(body) = entry.resource() {
        obj.insert(
            "type".to_string(),
            serde_json::Value::String(body.data_type().name().to_string()),
        );
        if !body.units.is_empty() {
            obj.insert(
                "units".to_string(),
                serde_json::Value::String(body.units.clone()),
            );
        }
        if entry_type == EntryType::Output {
            obj.insert(
                "mandatory".to_string(),
                serde_json::Value::Bool(body.io().map(|io| io.mandatory).unwrap_or(false)),
            );
        }
        if let Some(current) = &body.current {
            let value: serde_json::Value = serde_json::from_str(&current.to_json_string())
                .unwrap_or(serde_json::Value::Null);
            obj.insert(
                "value".to_string(),
                serde_json::json!({ "t": current.timestamp(), "v": value }),
            );
        }
    }

    let mut children = serde_json::Map::new();
    for child in &entry.children {
        let node = tree.entry(*child);
        if node.relevant {
            children.insert(node.name.clone(), encode_json(tree, *child));
        }
    }
    if !children.is_empty() {
        obj.insert(
            "children".to_string(),
            serde_json::Value::Object(children),
        );
    }

    serde_json::Value::Object(obj)
}

/// Encode relevant entries as flat `path kind [type t v]` lines.
fn encode_octave(
    tree: &ResTree,
    root: EntryId,
    since: f64,
    writer: &mut dyn Write,
) -> Result<()> {
    writeln!(writer, "# datahub snapshot since={}", since)?;
    for id in tree.walk(root, true) {
        let entry = tree.entry(id);
        if !entry.relevant {
            continue;
        }
        let path = tree.absolute_path(id);
        if entry.deleted {
            writeln!(writer, "{} deleted", path)?;
            continue;
        }
        match entry.resource() {
            Some(body) => {
                let value = body
                    .current
                    .as_ref()
                    .map(|s| format!(" {} {}", s.timestamp(), s.to_json_string()))
                    .unwrap_or_default();
                writeln!(
                    writer,
                    "{} {} {}{}",
                    path,
                    entry.entry_type().name(),
                    body.data_type().name(),
                    value
                )?;
            }
            None => writeln!(writer, "{} namespace", path)?,
        }
    }
    Ok(())
}
