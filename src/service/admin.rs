//! The administrative service.
//!
//! Administrators create and configure Observations, install routes, set
//! defaults and overrides on any resource, and bracket batches of changes
//! with the update barrier. Observation paths without a leading `/` are
//! relative to the `/obs` namespace; other paths are absolute.

use crate::error::{HubError, Result};
use crate::handler::HandlerId;
use crate::hub::{ChangeCallback, DestinationCallback, Hub};
use crate::sample::{DataSample, Value};
use crate::tree::EntryId;
use crate::types::{DataType, EntryType, TransformType};

/// Admin facade over the hub.
pub struct AdminService<'a> {
    hub: &'a mut Hub,
}

impl<'a> AdminService<'a> {
    pub fn new(hub: &'a mut Hub) -> AdminService<'a> {
        AdminService { hub }
    }

    /// Resolve an observation path: relative paths live under `/obs`.
    fn resolve_obs(&self, path: &str) -> Result<EntryId> {
        if path.starts_with('/') {
            self.hub.find_absolute(path).ok_or(HubError::NotFound)
        } else {
            let ns = self
                .hub
                .find_absolute("/obs")
                .ok_or(HubError::NotFound)?;
            self.hub.find_entry(ns, path).ok_or(HubError::NotFound)
        }
    }

    fn resolve(&self, path: &str) -> Result<EntryId> {
        self.hub.find_absolute(path).ok_or(HubError::NotFound)
    }

    // ── Observations ──

    pub fn create_observation(&mut self, path: &str) -> Result<EntryId> {
        tracing::debug!("create observation '{}'", path);
        if path.starts_with('/') {
            let root = self.hub.root();
            self.hub.create_observation(root, &path[1..])
        } else {
            let ns = self.hub.obs_namespace();
            self.hub.create_observation(ns, path)
        }
    }

    pub fn delete_observation(&mut self, path: &str) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.delete_observation(id)
    }

    // ── Routing ──

    /// Route samples from `source_path` into `dest_path`. Passing `None`
    /// clears the destination's source.
    pub fn set_source(&mut self, dest_path: &str, source_path: Option<&str>) -> Result<()> {
        let dest = self.resolve_any(dest_path)?;
        let source = match source_path {
            Some(path) => Some(self.resolve_any(path)?),
            None => None,
        };
        self.hub.set_source(dest, source)
    }

    pub fn get_source(&self, dest_path: &str) -> Result<Option<String>> {
        let dest = self.resolve_any(dest_path)?;
        Ok(self
            .hub
            .get_source(dest)
            .map(|src| self.hub.absolute_path(src)))
    }

    /// Resolve an absolute path or an `/obs`-relative observation name.
    fn resolve_any(&self, path: &str) -> Result<EntryId> {
        if path.starts_with('/') {
            self.resolve(path)
        } else {
            self.resolve_obs(path)
        }
    }

    /// Set an Observation's external destination label, or a path-shaped
    /// implicit route.
    pub fn set_destination(&mut self, obs_path: &str, destination: &str) -> Result<()> {
        let id = self.resolve_obs(obs_path)?;
        self.hub.set_destination(id, destination)
    }

    /// Register the callback behind a destination label.
    pub fn register_destination(&mut self, label: &str, callback: DestinationCallback) {
        self.hub.register_destination(label, callback);
    }

    /// Ensure a resource exists at an absolute path, creating a
    /// Placeholder when nothing (or a bare Namespace) is there.
    pub fn ensure_resource(&mut self, path: &str) -> Result<EntryId> {
        let root = self.hub.root();
        self.hub.tree_mut().get_resource(root, path)
    }

    // ── Admin pushes ──

    /// Push a value to any resource, creating a Placeholder if nothing
    /// exists at the path yet.
    pub fn push(&mut self, path: &str, timestamp: f64, value: Value) -> Result<()> {
        let root = self.hub.root();
        let id = self.hub.tree_mut().get_resource(root, path)?;
        let data_type = value.data_type();
        self.hub
            .push(id, data_type, DataSample::from_value(timestamp, value)?)
    }

    // ── Defaults and overrides ──

    pub fn set_default(&mut self, path: &str, value: Value) -> Result<()> {
        let id = self.resolve_any(path)?;
        let data_type = value.data_type();
        self.hub
            .set_default(id, data_type, DataSample::from_value(0.0, value)?)
    }

    pub fn remove_default(&mut self, path: &str) -> Result<()> {
        let id = self.resolve_any(path)?;
        self.hub.remove_default(id);
        Ok(())
    }

    pub fn has_default(&self, path: &str) -> Result<bool> {
        Ok(self.hub.has_default(self.resolve_any(path)?))
    }

    pub fn set_override(&mut self, path: &str, value: Value) -> Result<()> {
        let id = self.resolve_any(path)?;
        let data_type = value.data_type();
        self.hub
            .set_override(id, data_type, DataSample::from_value(0.0, value)?)
    }

    pub fn remove_override(&mut self, path: &str) -> Result<()> {
        let id = self.resolve_any(path)?;
        self.hub.remove_override(id);
        Ok(())
    }

    pub fn has_override(&self, path: &str) -> Result<bool> {
        Ok(self.hub.has_override(self.resolve_any(path)?))
    }

    // ── Observation settings ──

    pub fn set_min_period(&mut self, path: &str, period: f64) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.set_min_period(id, period)
    }

    pub fn get_min_period(&self, path: &str) -> Result<f64> {
        Ok(self.hub.min_period(self.resolve_obs(path)?))
    }

    pub fn set_change_by(&mut self, path: &str, change: f64) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.set_change_by(id, change)
    }

    pub fn get_change_by(&self, path: &str) -> Result<f64> {
        Ok(self.hub.change_by(self.resolve_obs(path)?))
    }

    pub fn set_low_limit(&mut self, path: &str, limit: f64) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.set_low_limit(id, limit)
    }

    pub fn set_high_limit(&mut self, path: &str, limit: f64) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.set_high_limit(id, limit)
    }

    pub fn set_transform(&mut self, path: &str, transform: TransformType) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.set_transform(id, transform)
    }

    pub fn set_buffer_max_count(&mut self, path: &str, count: u32) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.set_buffer_max_count(id, count)
    }

    pub fn set_buffer_backup_period(&mut self, path: &str, seconds: u32) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.set_buffer_backup_period(id, seconds)
    }

    pub fn set_json_extraction(&mut self, path: &str, spec: &str) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.set_json_extraction(id, spec)
    }

    pub fn mark_observation_as_config(&mut self, path: &str) -> Result<()> {
        let id = self.resolve_obs(path)?;
        self.hub.mark_observation_as_config(id)
    }

    // ── Update barrier ──

    pub fn start_update(&mut self) {
        self.hub.start_update();
    }

    pub fn end_update(&mut self) {
        self.hub.end_update();
    }

    // ── Tree inspection ──

    pub fn entry_type(&self, path: &str) -> Result<EntryType> {
        Ok(self.hub.entry_type(self.resolve(path)?))
    }

    pub fn units(&self, path: &str) -> Result<String> {
        Ok(self.hub.units(self.resolve(path)?))
    }

    pub fn data_type(&self, path: &str) -> Result<DataType> {
        self.hub
            .data_type(self.resolve(path)?)
            .ok_or(HubError::NotFound)
    }

    pub fn is_mandatory(&self, path: &str) -> Result<bool> {
        Ok(self.hub.is_mandatory(self.resolve(path)?))
    }

    pub fn set_deletion_tracking(&mut self, enabled: bool) {
        self.hub.set_deletion_tracking(enabled);
    }

    pub fn add_resource_tree_change_handler(&mut self, callback: ChangeCallback) -> HandlerId {
        self.hub.add_change_handler(callback)
    }

    pub fn remove_resource_tree_change_handler(&mut self, handler: HandlerId) {
        self.hub.remove_change_handler(handler);
    }
}
