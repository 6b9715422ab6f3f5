//! The hub context.
//!
//! [`Hub`] owns the resource tree and everything that crosses resource
//! boundaries: the push pipeline, source/destination routing, the update
//! barrier, update and tree-change notifications, destination-push
//! callbacks and observation buffer backups. All operations run on one
//! thread; there is no module-level mutable state.
//!
//! # Push Pipeline
//!
//! A push travels: barrier collapse -> namespace drop -> type coercion
//! (Inputs/Outputs) -> filter + transform (Observations) -> current-value
//! update -> handler dispatch -> buffer append and backup scheduling ->
//! depth-first propagation to downstream resources. Handler callbacks are
//! invoked synchronously, in registration order, and receive the sample
//! converted to their requested type. Filter rejection is silent success.

use crate::backup;
use crate::coerce::coerce;
use crate::error::{HubError, Result};
use crate::handler::{HandlerId, PushCallback};
use crate::resource::observation::FilterOutcome;
use crate::resource::{ResourceBody, TypedSample};
use crate::sample::{DataSample, Value};
use crate::tree::{EntryId, ResTree};
use crate::types::{
    now_timestamp, resolve_window_start, units_compatible, DataType, EntryType, ResourceOperation,
    TransformType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// Callback invoked when an update barrier starts (`true`) or ends
/// (`false`).
pub type UpdateCallback = Box<dyn FnMut(bool)>;

/// Callback invoked when an accepted observation sample is sent to an
/// external destination label: `(source path, data type, timestamp, value)`.
pub type DestinationCallback = Box<dyn FnMut(&str, DataType, f64, &Value)>;

/// Callback invoked when a resource is added to or removed from the tree:
/// `(absolute path, entry type, operation)`.
pub type ChangeCallback = Box<dyn FnMut(&str, EntryType, ResourceOperation)>;

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Directory holding observation buffer backup files.
    pub backup_dir: PathBuf,
    /// Whether clients may override their namespace (permitted only on
    /// non-hosted deployments).
    pub allow_namespace_override: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            backup_dir: PathBuf::from("datahub-backup"),
            allow_namespace_override: false,
        }
    }
}

/// The hub: resource tree plus cross-resource state.
pub struct Hub {
    tree: ResTree,
    config: HubConfig,
    clock: Box<dyn Fn() -> f64>,
    update_in_progress: bool,
    deletion_tracking: bool,
    next_handler_id: u64,
    update_handlers: Vec<(HandlerId, UpdateCallback)>,
    change_handlers: Vec<(HandlerId, ChangeCallback)>,
    dest_handlers: HashMap<String, DestinationCallback>,
    /// Explicit namespace overrides, keyed by client identifier.
    client_namespaces: HashMap<String, String>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Hub {
        Hub {
            tree: ResTree::new(),
            config,
            clock: Box::new(now_timestamp),
            update_in_progress: false,
            deletion_tracking: false,
            next_handler_id: 1,
            update_handlers: Vec::new(),
            change_handlers: Vec::new(),
            dest_handlers: HashMap::new(),
            client_namespaces: HashMap::new(),
        }
    }

    /// Replace the wall-clock source. Used by embedders and tests that need
    /// deterministic time.
    pub fn set_clock(&mut self, clock: impl Fn() -> f64 + 'static) {
        self.clock = Box::new(clock);
    }

    pub fn now(&self) -> f64 {
        (self.clock)()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn tree(&self) -> &ResTree {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut ResTree {
        &mut self.tree
    }

    fn next_handler_id(&mut self) -> HandlerId {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        id
    }

    // ── Namespaces ──

    pub fn root(&self) -> EntryId {
        self.tree.root()
    }

    /// The `/obs` namespace, created on first use.
    pub fn obs_namespace(&mut self) -> EntryId {
        self.tree
            .get_entry(self.tree.root(), "obs")
            .expect("obs namespace")
    }

    /// The `/app/<name>` namespace for a client, created on first use.
    /// The namespace name defaults to the client identifier unless an
    /// explicit override was set.
    pub fn client_namespace(&mut self, client: &str) -> Result<EntryId> {
        let name = self
            .client_namespaces
            .get(client)
            .cloned()
            .unwrap_or_else(|| client.to_string());
        self.tree
            .get_entry(self.tree.root(), &format!("app/{}", name))
    }

    /// Override a client's namespace. Permitted only on non-hosted
    /// deployments.
    pub fn set_client_namespace(&mut self, client: &str, namespace: &str) -> Result<()> {
        if !self.config.allow_namespace_override {
            return Err(HubError::NotPermitted);
        }
        if self.client_namespaces.contains_key(client) {
            return Err(HubError::Duplicate(format!(
                "namespace already set for client '{}'",
                client
            )));
        }
        self.client_namespaces
            .insert(client.to_string(), namespace.to_string());
        Ok(())
    }

    // ── Resource creation and deletion ──

    pub fn find_entry(&self, base: EntryId, path: &str) -> Option<EntryId> {
        self.tree.find_entry(base, path)
    }

    pub fn find_absolute(&self, path: &str) -> Option<EntryId> {
        self.tree.find_absolute(path)
    }

    pub fn entry_type(&self, id: EntryId) -> EntryType {
        self.tree.entry_type(id)
    }

    pub fn entry_name(&self, id: EntryId) -> String {
        self.tree.entry(id).name.clone()
    }

    pub fn parent(&self, id: EntryId) -> Option<EntryId> {
        self.tree.entry(id).parent
    }

    /// First child of an entry, skipping tombstones.
    pub fn first_child(&self, id: EntryId) -> Option<EntryId> {
        self.tree.first_child(id, false)
    }

    /// Next sibling of an entry, skipping tombstones.
    pub fn next_sibling(&self, id: EntryId) -> Option<EntryId> {
        self.tree.next_sibling(id, false)
    }

    /// Live children of an entry, in insertion order.
    pub fn children(&self, id: EntryId) -> Vec<EntryId> {
        self.tree.children(id)
    }

    pub fn absolute_path(&self, id: EntryId) -> String {
        self.tree.absolute_path(id)
    }

    /// Path of an entry relative to a base entry. Fails with `NotFound`
    /// when the entry is not a descendant of the base; nothing is
    /// partially produced on error.
    pub fn relative_path(&self, base: EntryId, entry: EntryId) -> Result<String> {
        self.tree.get_path(base, entry)
    }

    pub fn create_input(
        &mut self,
        base: EntryId,
        path: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<EntryId> {
        let promo = self.tree.create_input(base, path, data_type, units)?;
        if promo.created {
            self.notify_change(promo.id, EntryType::Input, ResourceOperation::Added);
            self.apply_default_if_unset(promo.id);
        }
        Ok(promo.id)
    }

    pub fn create_output(
        &mut self,
        base: EntryId,
        path: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<EntryId> {
        let promo = self.tree.create_output(base, path, data_type, units)?;
        if promo.created {
            self.notify_change(promo.id, EntryType::Output, ResourceOperation::Added);
            self.apply_default_if_unset(promo.id);
        }
        Ok(promo.id)
    }

    /// Get or create an Observation, restoring any buffer backup left by a
    /// previous incarnation at the same path.
    pub fn create_observation(&mut self, base: EntryId, path: &str) -> Result<EntryId> {
        let promo = self.tree.get_observation(base, path)?;
        if promo.created {
            self.restore_backup(promo.id);
            self.notify_change(promo.id, EntryType::Observation, ResourceOperation::Added);
        }
        Ok(promo.id)
    }

    /// Delete an Input or Output. Downgrades to a Placeholder when admin
    /// settings survive, otherwise tombstones or releases the entry.
    ///
    /// Returns `InProgress` when the resource is covered by an active
    /// update barrier.
    pub fn delete_io(&mut self, id: EntryId) -> Result<()> {
        let entry_type = self.tree.entry_type(id);
        if !matches!(entry_type, EntryType::Input | EntryType::Output) {
            return Err(HubError::NotFound);
        }
        self.check_not_in_barrier(id)?;
        // Notify before the body goes away; a Placeholder downgrade still
        // counts as a removal of the I/O resource.
        self.notify_change(id, entry_type, ResourceOperation::Removed);

        let body = self.tree.detach_body(id).ok_or(HubError::NotFound)?;
        if body.has_admin_settings() {
            let mut placeholder = ResourceBody::new_placeholder();
            ResourceBody::move_admin_settings(body, &mut placeholder);
            self.tree.attach_body(id, placeholder);
        } else {
            self.detach_routes(id, &body);
            self.tree.record_deletion(id, self.deletion_tracking);
        }
        Ok(())
    }

    /// Delete an Observation, discarding its settings, routes and backup.
    ///
    /// Returns `InProgress` when the observation is covered by an active
    /// update barrier.
    pub fn delete_observation(&mut self, id: EntryId) -> Result<()> {
        if self.tree.entry_type(id) != EntryType::Observation {
            return Err(HubError::NotFound);
        }
        self.check_not_in_barrier(id)?;
        self.notify_change(id, EntryType::Observation, ResourceOperation::Removed);

        let path = self.tree.absolute_path(id);
        backup::delete_backup(&self.config.backup_dir, &path);

        let body = self.tree.detach_body(id).ok_or(HubError::NotFound)?;
        self.detach_routes(id, &body);
        self.tree.record_deletion(id, self.deletion_tracking);
        Ok(())
    }

    /// Reject destructive admin actions on a resource the active update
    /// barrier covers.
    fn check_not_in_barrier(&self, id: EntryId) -> Result<()> {
        if self.update_in_progress {
            if let Some(body) = self.tree.resource(id) {
                if body.update_pending {
                    return Err(HubError::InProgress);
                }
            }
        }
        Ok(())
    }

    /// Drop every route touching a resource that is going away.
    fn detach_routes(&mut self, id: EntryId, body: &ResourceBody) {
        if let Some(src) = body.source {
            if let Some(src_body) = self.tree.resource_mut(src) {
                src_body.dests.retain(|&d| d != id);
            }
        }
        for &dest in &body.dests {
            if let Some(dest_body) = self.tree.resource_mut(dest) {
                dest_body.source = None;
            }
        }
    }

    fn notify_change(&mut self, id: EntryId, entry_type: EntryType, op: ResourceOperation) {
        if self.change_handlers.is_empty() {
            return;
        }
        let path = self.tree.absolute_path(id);
        for (_, handler) in self.change_handlers.iter_mut() {
            handler(&path, entry_type, op);
        }
    }

    // ── Routing ──

    /// Set (or clear) the source of a destination resource.
    ///
    /// Fails with `Duplicate` if following the proposed source's own source
    /// links transitively reaches the destination; the destination's source
    /// is left unchanged in that case.
    pub fn set_source(&mut self, dest: EntryId, source: Option<EntryId>) -> Result<()> {
        if !self.tree.is_resource(dest) {
            return Err(HubError::BadParameter(
                "destination is not a resource".to_string(),
            ));
        }

        if let Some(src) = source {
            if !self.tree.is_resource(src) {
                return Err(HubError::BadParameter(
                    "source is not a resource".to_string(),
                ));
            }
            // Walk up the source chain looking for the destination.
            let mut cursor = src;
            loop {
                if cursor == dest {
                    return Err(HubError::Duplicate(
                        "route would create a loop".to_string(),
                    ));
                }
                match self.tree.resource(cursor).and_then(|b| b.source) {
                    Some(up) => cursor = up,
                    None => break,
                }
            }
        }

        let old = self.tree.resource(dest).and_then(|b| b.source);
        if old == source {
            return Ok(());
        }
        if let Some(old_src) = old {
            if let Some(body) = self.tree.resource_mut(old_src) {
                body.dests.retain(|&d| d != dest);
            }
        }
        self.tree.resource_mut(dest).unwrap().source = source;
        if let Some(src) = source {
            self.tree.resource_mut(src).unwrap().dests.push(dest);
        }
        self.touch_for_update(dest);
        Ok(())
    }

    pub fn get_source(&self, dest: EntryId) -> Option<EntryId> {
        self.tree.resource(dest).and_then(|b| b.source)
    }

    /// Set an Observation's destination. Path-shaped labels (leading `/`)
    /// install an implicit source link on the referenced resource;
    /// other labels select a registered destination-push callback.
    pub fn set_destination(&mut self, obs: EntryId, destination: &str) -> Result<()> {
        if self.tree.entry_type(obs) != EntryType::Observation {
            return Err(HubError::BadParameter("not an observation".to_string()));
        }
        if destination.starts_with('/') {
            let target = self.tree.get_resource(self.tree.root(), destination)?;
            self.set_source(target, Some(obs))?;
        }
        self.tree
            .resource_mut(obs)
            .unwrap()
            .observation_mut()
            .unwrap()
            .destination = destination.to_string();
        self.touch_for_update(obs);
        Ok(())
    }

    /// Register a destination-push callback under a label.
    pub fn register_destination(&mut self, label: &str, callback: DestinationCallback) {
        self.dest_handlers.insert(label.to_string(), callback);
    }

    pub fn unregister_destination(&mut self, label: &str) {
        self.dest_handlers.remove(label);
    }

    // ── Update barrier ──

    /// Notify that administrative changes are about to be performed.
    ///
    /// Resources whose routing or filter settings change before
    /// [`Hub::end_update`] collapse incoming pushes to their single most
    /// recent sample, flushed when the barrier ends.
    pub fn start_update(&mut self) {
        if self.update_in_progress {
            return;
        }
        self.update_in_progress = true;
        for (_, handler) in self.update_handlers.iter_mut() {
            handler(true);
        }
    }

    /// Notify that all pending administrative changes have been applied.
    /// Collapsed samples are flushed in tree-discovery order.
    pub fn end_update(&mut self) {
        if !self.update_in_progress {
            return;
        }
        self.update_in_progress = false;

        for id in self.tree.walk(self.tree.root(), false) {
            let pending: Option<TypedSample> = match self.tree.resource_mut(id) {
                Some(body) => {
                    body.update_pending = false;
                    body.pending.take()
                }
                None => None,
            };
            if let Some((data_type, sample)) = pending {
                if let Err(e) = self.push_internal(id, data_type, sample) {
                    tracing::warn!("failed to flush pending sample: {}", e);
                }
            }
        }

        for (_, handler) in self.update_handlers.iter_mut() {
            handler(false);
        }
    }

    pub fn is_updating(&self) -> bool {
        self.update_in_progress
    }

    /// Mark a resource as affected by an in-barrier administrative change.
    fn touch_for_update(&mut self, id: EntryId) {
        if self.update_in_progress {
            if let Some(body) = self.tree.resource_mut(id) {
                body.update_pending = true;
            }
        }
    }

    pub fn add_update_handler(&mut self, callback: UpdateCallback) -> HandlerId {
        let id = self.next_handler_id();
        self.update_handlers.push((id, callback));
        id
    }

    pub fn remove_update_handler(&mut self, id: HandlerId) {
        self.update_handlers.retain(|(h, _)| *h != id);
    }

    pub fn add_change_handler(&mut self, callback: ChangeCallback) -> HandlerId {
        let id = self.next_handler_id();
        self.change_handlers.push((id, callback));
        id
    }

    pub fn remove_change_handler(&mut self, id: HandlerId) {
        self.change_handlers.retain(|(h, _)| *h != id);
    }

    // ── Push pipeline ──

    /// Push a sample to a resource. A timestamp of 0 means "now".
    pub fn push(&mut self, id: EntryId, data_type: DataType, sample: Rc<DataSample>) -> Result<()> {
        if sample.timestamp() == 0.0 {
            sample.set_timestamp(self.now());
        }
        self.push_internal(id, data_type, sample)
    }

    fn push_internal(
        &mut self,
        id: EntryId,
        data_type: DataType,
        sample: Rc<DataSample>,
    ) -> Result<()> {
        let (update_pending, declared_type, is_observation) = match self.tree.resource(id) {
            Some(body) => (
                body.update_pending,
                body.io().map(|io| io.data_type),
                body.entry_type() == EntryType::Observation,
            ),
            // Namespaces drop the sample.
            None => return Ok(()),
        };

        if self.update_in_progress && update_pending {
            // Collapse to the single latest pending sample.
            self.tree.resource_mut(id).unwrap().pending = Some((data_type, sample));
            return Ok(());
        }

        let mut data_type = data_type;
        let mut sample = sample;

        if let Some(declared) = declared_type {
            sample = coerce(declared, &sample)?;
            data_type = declared;
        }

        let mut accepted_raw: Option<TypedSample> = None;
        if is_observation {
            let body = self.tree.resource(id).unwrap();
            let obs = body.observation().unwrap();
            let (raw_type, raw) = match obs.filter(body.current.as_ref(), data_type, &sample) {
                FilterOutcome::Reject => return Ok(()),
                FilterOutcome::Accept(dt, s) => (dt, s),
            };
            let (out_type, out) = obs.apply_transform(raw_type, &raw);
            accepted_raw = Some((raw_type, raw));
            data_type = out_type;
            sample = out;
        }

        // Accept: update the buffer and the current value.
        {
            let body = self.tree.resource_mut(id).unwrap();
            if let Some((raw_type, raw)) = accepted_raw {
                let obs = body.observation_mut().unwrap();
                obs.last_accepted_ts = Some(raw.timestamp());
                obs.buffer_append(raw_type, raw);
            }
            if let Some((override_type, override_value)) = &body.override_ {
                // The override's value wins; the push's timestamp survives.
                data_type = *override_type;
                sample = DataSample::from_value(
                    sample.timestamp(),
                    override_value.value().clone(),
                )?;
            }
            body.current = Some(Rc::clone(&sample));
            body.current_type = data_type;
        }

        self.dispatch_handlers(id, &sample);

        if is_observation {
            self.deliver_to_destination(id, data_type, &sample);
            self.maybe_backup(id);
        }

        // Depth-first propagation to downstream resources.
        let (dests, src_units) = {
            let body = self.tree.resource(id).unwrap();
            (body.dests.clone(), body.units.clone())
        };
        for dest in dests {
            let dest_entry = self.tree.entry(dest);
            // Samples arriving via a source route into an Input are ignored.
            if dest_entry.entry_type() == EntryType::Input {
                continue;
            }
            let dest_units = dest_entry
                .resource()
                .map(|b| b.units.clone())
                .unwrap_or_default();
            if !units_compatible(&src_units, &dest_units) {
                tracing::warn!(
                    "unit mismatch on route: '{}' vs '{}'",
                    src_units,
                    dest_units
                );
                continue;
            }
            if let Err(e) = self.push_internal(dest, data_type, Rc::clone(&sample)) {
                tracing::warn!("downstream push failed: {}", e);
            }
        }

        Ok(())
    }

    /// Invoke every push handler on a resource, each with the sample
    /// converted to its requested type, in registration order.
    fn dispatch_handlers(&mut self, id: EntryId, sample: &Rc<DataSample>) {
        let deliveries: Vec<(usize, Rc<DataSample>)> = {
            let body = self.tree.resource(id).unwrap();
            body.handlers
                .requested_types()
                .into_iter()
                .filter_map(|(index, want)| coerce(want, sample).ok().map(|s| (index, s)))
                .collect()
        };
        for (index, converted) in deliveries {
            if let Some(handler) = self
                .tree
                .resource_mut(id)
                .and_then(|b| b.handlers.get_mut(index))
            {
                (handler.callback)(converted.timestamp(), converted.value());
            }
        }
    }

    /// Send an accepted observation sample to its external destination
    /// label, if one is set and a callback is registered for it.
    fn deliver_to_destination(&mut self, id: EntryId, data_type: DataType, sample: &Rc<DataSample>) {
        let (label, extraction) = {
            let obs = self.tree.resource(id).unwrap().observation().unwrap();
            (obs.destination.clone(), obs.json_extraction.clone())
        };
        if label.is_empty() || label.starts_with('/') {
            return;
        }
        let mut path = self.tree.absolute_path(id);
        if !extraction.is_empty() {
            path.push('/');
            path.push_str(&extraction);
        }
        if let Some(callback) = self.dest_handlers.get_mut(&label) {
            callback(&path, data_type, sample.timestamp(), sample.value());
        }
    }

    // ── Push handlers ──

    /// Add a push handler to a resource. If the resource already has a
    /// current value, the handler is invoked with it immediately, before
    /// this call returns.
    pub fn add_push_handler(
        &mut self,
        id: EntryId,
        data_type: DataType,
        callback: PushCallback,
    ) -> Result<HandlerId> {
        let handler_id = self.next_handler_id();
        let replay = {
            let body = self
                .tree
                .resource_mut(id)
                .ok_or(HubError::NotFound)?;
            let replay = body.current.clone();
            body.handlers.add(handler_id, data_type, callback);
            replay
        };
        if let Some(current) = replay {
            if let Ok(converted) = coerce(data_type, &current) {
                let body = self.tree.resource_mut(id).unwrap();
                let index = body.handlers.len() - 1;
                if let Some(handler) = body.handlers.get_mut(index) {
                    (handler.callback)(converted.timestamp(), converted.value());
                }
            }
        }
        Ok(handler_id)
    }

    /// Remove a push handler from whichever resource holds it.
    pub fn remove_push_handler(&mut self, handler: HandlerId) -> Result<()> {
        for id in self.tree.walk(self.tree.root(), true) {
            if let Some(body) = self.tree.resource_mut(id) {
                if body.handlers.remove(handler) {
                    return Ok(());
                }
            }
        }
        Err(HubError::Fault("no such handler".to_string()))
    }

    // ── Values: current, default, override, JSON example ──

    pub fn current_value(&self, id: EntryId) -> Option<(DataType, Rc<DataSample>)> {
        let body = self.tree.resource(id)?;
        body.current
            .as_ref()
            .map(|s| (body.current_type, Rc::clone(s)))
    }

    pub fn get_timestamp(&self, id: EntryId) -> Result<f64> {
        let (_, sample) = self.current_value(id).ok_or(HubError::Unavailable)?;
        Ok(sample.timestamp())
    }

    pub fn get_boolean(&self, id: EntryId) -> Result<bool> {
        let (data_type, sample) = self.current_value(id).ok_or(HubError::Unavailable)?;
        if data_type != DataType::Boolean {
            return Err(HubError::FormatError(format!(
                "value is {}, not boolean",
                data_type.name()
            )));
        }
        Ok(sample.as_bool().unwrap_or(false))
    }

    pub fn get_numeric(&self, id: EntryId) -> Result<f64> {
        let (data_type, sample) = self.current_value(id).ok_or(HubError::Unavailable)?;
        if data_type != DataType::Numeric {
            return Err(HubError::FormatError(format!(
                "value is {}, not numeric",
                data_type.name()
            )));
        }
        Ok(sample.as_numeric().unwrap_or(f64::NAN))
    }

    /// Current value rendered as a printable string, whatever its type.
    pub fn get_string(&self, id: EntryId) -> Result<String> {
        let (_, sample) = self.current_value(id).ok_or(HubError::Unavailable)?;
        Ok(sample.to_display_string())
    }

    /// Current value rendered in JSON form, whatever its type.
    pub fn get_json(&self, id: EntryId) -> Result<String> {
        let (_, sample) = self.current_value(id).ok_or(HubError::Unavailable)?;
        Ok(sample.to_json_string())
    }

    /// Timestamp of the last modification, if the resource has a value.
    pub fn last_modified(&self, id: EntryId) -> Option<f64> {
        self.current_value(id).map(|(_, s)| s.timestamp())
    }

    /// Set the default value of a resource. Inputs and Outputs reject a
    /// default whose type does not match their declared type. If the
    /// resource has no current value, the default is delivered through the
    /// normal pipeline.
    pub fn set_default(
        &mut self,
        id: EntryId,
        data_type: DataType,
        value: Rc<DataSample>,
    ) -> Result<()> {
        let body = self.tree.resource_mut(id).ok_or(HubError::NotFound)?;
        if let Some(io) = body.io() {
            if io.data_type != data_type {
                return Err(HubError::BadParameter(format!(
                    "default type {} does not match declared type {}",
                    data_type.name(),
                    io.data_type.name()
                )));
            }
        }
        body.default = Some((data_type, Rc::clone(&value)));
        if body.current.is_none() {
            self.push(id, data_type, value)?;
        }
        Ok(())
    }

    fn apply_default_if_unset(&mut self, id: EntryId) {
        let default = match self.tree.resource(id) {
            Some(body) if body.current.is_none() => body.default.clone(),
            _ => None,
        };
        if let Some((data_type, value)) = default {
            if let Err(e) = self.push(id, data_type, value) {
                tracing::warn!("failed to apply migrated default: {}", e);
            }
        }
    }

    pub fn has_default(&self, id: EntryId) -> bool {
        self.tree
            .resource(id)
            .map(|b| b.default.is_some())
            .unwrap_or(false)
    }

    pub fn get_default(&self, id: EntryId) -> Option<(DataType, Rc<DataSample>)> {
        self.tree.resource(id).and_then(|b| b.default.clone())
    }

    pub fn remove_default(&mut self, id: EntryId) {
        if let Some(body) = self.tree.resource_mut(id) {
            body.default = None;
        }
    }

    /// Set an override. While in effect, accepted pushes carry the
    /// override's value (with the push's timestamp). The override is also
    /// delivered immediately.
    pub fn set_override(
        &mut self,
        id: EntryId,
        data_type: DataType,
        value: Rc<DataSample>,
    ) -> Result<()> {
        let body = self.tree.resource_mut(id).ok_or(HubError::NotFound)?;
        if let Some(io) = body.io() {
            if io.data_type != data_type {
                return Err(HubError::BadParameter(format!(
                    "override type {} does not match declared type {}",
                    data_type.name(),
                    io.data_type.name()
                )));
            }
        }
        body.override_ = Some((data_type, Rc::clone(&value)));
        self.push(id, data_type, value)
    }

    pub fn has_override(&self, id: EntryId) -> bool {
        self.tree
            .resource(id)
            .map(|b| b.override_.is_some())
            .unwrap_or(false)
    }

    pub fn get_override(&self, id: EntryId) -> Option<(DataType, Rc<DataSample>)> {
        self.tree.resource(id).and_then(|b| b.override_.clone())
    }

    pub fn remove_override(&mut self, id: EntryId) {
        if let Some(body) = self.tree.resource_mut(id) {
            body.override_ = None;
        }
    }

    pub fn set_json_example(&mut self, id: EntryId, example: Rc<DataSample>) -> Result<()> {
        let body = self.tree.resource_mut(id).ok_or(HubError::NotFound)?;
        body.json_example = Some(example);
        body.json_example_changed = true;
        Ok(())
    }

    pub fn get_json_example(&self, id: EntryId) -> Option<Rc<DataSample>> {
        self.tree.resource(id).and_then(|b| b.json_example.clone())
    }

    // ── Observation settings ──

    fn observation_mut(
        &mut self,
        id: EntryId,
    ) -> Result<&mut crate::resource::observation::ObservationBody> {
        self.tree
            .resource_mut(id)
            .and_then(|b| b.observation_mut())
            .ok_or_else(|| HubError::BadParameter("not an observation".to_string()))
    }

    fn observation(&self, id: EntryId) -> Result<&crate::resource::observation::ObservationBody> {
        self.tree
            .resource(id)
            .and_then(|b| b.observation())
            .ok_or_else(|| HubError::BadParameter("not an observation".to_string()))
    }

    pub fn set_min_period(&mut self, id: EntryId, period: f64) -> Result<()> {
        self.observation_mut(id)?.min_period = period;
        self.touch_for_update(id);
        Ok(())
    }

    pub fn min_period(&self, id: EntryId) -> f64 {
        self.observation(id).map(|o| o.min_period).unwrap_or(0.0)
    }

    pub fn set_change_by(&mut self, id: EntryId, change: f64) -> Result<()> {
        self.observation_mut(id)?.change_by = change;
        self.touch_for_update(id);
        Ok(())
    }

    pub fn change_by(&self, id: EntryId) -> f64 {
        self.observation(id).map(|o| o.change_by).unwrap_or(0.0)
    }

    pub fn set_low_limit(&mut self, id: EntryId, limit: f64) -> Result<()> {
        self.observation_mut(id)?.low_limit = limit;
        self.touch_for_update(id);
        Ok(())
    }

    pub fn low_limit(&self, id: EntryId) -> f64 {
        self.observation(id)
            .map(|o| o.low_limit)
            .unwrap_or(f64::NAN)
    }

    pub fn set_high_limit(&mut self, id: EntryId, limit: f64) -> Result<()> {
        self.observation_mut(id)?.high_limit = limit;
        self.touch_for_update(id);
        Ok(())
    }

    pub fn high_limit(&self, id: EntryId) -> f64 {
        self.observation(id)
            .map(|o| o.high_limit)
            .unwrap_or(f64::NAN)
    }

    pub fn set_transform(&mut self, id: EntryId, transform: TransformType) -> Result<()> {
        self.observation_mut(id)?.transform = transform;
        self.touch_for_update(id);
        Ok(())
    }

    pub fn transform(&self, id: EntryId) -> TransformType {
        self.observation(id)
            .map(|o| o.transform)
            .unwrap_or_default()
    }

    pub fn set_buffer_max_count(&mut self, id: EntryId, count: u32) -> Result<()> {
        self.observation_mut(id)?.set_buffer_max(count);
        self.touch_for_update(id);
        Ok(())
    }

    pub fn buffer_max_count(&self, id: EntryId) -> u32 {
        self.observation(id).map(|o| o.buffer_max).unwrap_or(0)
    }

    pub fn set_buffer_backup_period(&mut self, id: EntryId, seconds: u32) -> Result<()> {
        self.observation_mut(id)?.backup_period = seconds;
        Ok(())
    }

    pub fn buffer_backup_period(&self, id: EntryId) -> u32 {
        self.observation(id).map(|o| o.backup_period).unwrap_or(0)
    }

    pub fn set_json_extraction(&mut self, id: EntryId, spec: &str) -> Result<()> {
        self.observation_mut(id)?.json_extraction = spec.to_string();
        self.touch_for_update(id);
        Ok(())
    }

    pub fn json_extraction(&self, id: EntryId) -> String {
        self.observation(id)
            .map(|o| o.json_extraction.clone())
            .unwrap_or_default()
    }

    pub fn mark_observation_as_config(&mut self, id: EntryId) -> Result<()> {
        self.observation_mut(id)?.is_config = true;
        Ok(())
    }

    pub fn is_observation_config(&self, id: EntryId) -> bool {
        self.observation(id).map(|o| o.is_config).unwrap_or(false)
    }

    pub fn mark_optional(&mut self, id: EntryId) -> Result<()> {
        let io = self
            .tree
            .resource_mut(id)
            .and_then(|b| b.io_mut())
            .ok_or(HubError::NotFound)?;
        io.mandatory = false;
        Ok(())
    }

    /// Whether a resource is a mandatory Output.
    pub fn is_mandatory(&self, id: EntryId) -> bool {
        self.tree
            .resource(id)
            .and_then(|b| b.io())
            .map(|io| io.is_output && io.mandatory)
            .unwrap_or(false)
    }

    pub fn units(&self, id: EntryId) -> String {
        self.tree
            .resource(id)
            .map(|b| b.units.clone())
            .unwrap_or_default()
    }

    pub fn data_type(&self, id: EntryId) -> Option<DataType> {
        self.tree.resource(id).map(|b| b.data_type())
    }

    // ── Buffer queries ──

    pub fn query_min(&self, id: EntryId, start_time: f64) -> f64 {
        self.observation(id)
            .map(|o| o.query_min(resolve_window_start(start_time, self.now())))
            .unwrap_or(f64::NAN)
    }

    pub fn query_max(&self, id: EntryId, start_time: f64) -> f64 {
        self.observation(id)
            .map(|o| o.query_max(resolve_window_start(start_time, self.now())))
            .unwrap_or(f64::NAN)
    }

    pub fn query_mean(&self, id: EntryId, start_time: f64) -> f64 {
        self.observation(id)
            .map(|o| o.query_mean(resolve_window_start(start_time, self.now())))
            .unwrap_or(f64::NAN)
    }

    pub fn query_std_dev(&self, id: EntryId, start_time: f64) -> f64 {
        self.observation(id)
            .map(|o| o.query_std_dev(resolve_window_start(start_time, self.now())))
            .unwrap_or(f64::NAN)
    }

    /// The oldest buffered sample newer than the given start time.
    pub fn find_buffered_sample_after(
        &self,
        id: EntryId,
        start_after: f64,
    ) -> Option<Rc<DataSample>> {
        let threshold = resolve_window_start(start_after, self.now());
        self.observation(id)
            .ok()
            .and_then(|o| o.find_sample_after(threshold).cloned())
    }

    /// Write buffered samples newer than `start_after` as a JSON array of
    /// `{"t":...,"v":...}` records (timestamp only for triggers).
    pub fn read_buffer_json(
        &self,
        id: EntryId,
        start_after: f64,
        writer: &mut dyn std::io::Write,
    ) -> Result<()> {
        let threshold = resolve_window_start(start_after, self.now());
        let obs = self.observation(id)?;
        write!(writer, "[")?;
        for (i, sample) in obs.samples_after(threshold).enumerate() {
            if i > 0 {
                write!(writer, ",")?;
            }
            match sample.value() {
                Value::Trigger => write!(writer, "{{\"t\":{}}}", sample.timestamp())?,
                _ => write!(
                    writer,
                    "{{\"t\":{},\"v\":{}}}",
                    sample.timestamp(),
                    sample.to_json_string()
                )?,
            }
        }
        write!(writer, "]")?;
        Ok(())
    }

    // ── Deletion tracking ──

    /// Enable or disable deletion tracking. Disabling flushes any
    /// accumulated tombstones.
    pub fn set_deletion_tracking(&mut self, enabled: bool) {
        self.deletion_tracking = enabled;
        if !enabled {
            self.tree.flush_tombstones();
        }
    }

    pub fn is_deletion_tracking(&self) -> bool {
        self.deletion_tracking
    }

    /// Visit every resource in the tree (pre-order).
    pub fn for_each_resource(&self, mut func: impl FnMut(EntryId, EntryType)) {
        for id in self.tree.walk(self.tree.root(), false) {
            let entry_type = self.tree.entry_type(id);
            if entry_type != EntryType::Namespace {
                func(id, entry_type);
            }
        }
    }

    /// Observation entries installed by the config service.
    pub(crate) fn config_observations(&self) -> Vec<EntryId> {
        let mut out = Vec::new();
        self.for_each_resource(|id, entry_type| {
            if entry_type == EntryType::Observation && self.is_observation_config(id) {
                out.push(id);
            }
        });
        out
    }

    // ── Buffer backups ──

    /// Write the backup for one observation if it is due.
    fn maybe_backup(&mut self, id: EntryId) {
        let now = self.now();
        let due = {
            let obs = match self.observation(id) {
                Ok(obs) => obs,
                Err(_) => return,
            };
            obs.backup_period > 0
                && obs.buffer_max > 0
                && obs.backup_dirty
                && now - obs.last_backup >= obs.backup_period as f64
        };
        if due {
            self.write_backup_now(id, now);
        }
    }

    /// Write every dirty observation buffer whose backup period has
    /// elapsed. The embedding runtime calls this on its loop tick.
    pub fn run_due_backups(&mut self) {
        let now = self.now();
        let mut due = Vec::new();
        self.for_each_resource(|id, entry_type| {
            if entry_type == EntryType::Observation {
                due.push(id);
            }
        });
        for id in due {
            let ready = self
                .observation(id)
                .map(|o| {
                    o.backup_period > 0
                        && o.buffer_max > 0
                        && o.backup_dirty
                        && now - o.last_backup >= o.backup_period as f64
                })
                .unwrap_or(false);
            if ready {
                self.write_backup_now(id, now);
            }
        }
    }

    fn write_backup_now(&mut self, id: EntryId, now: f64) {
        let path = self.tree.absolute_path(id);
        let result = {
            let obs = self.observation(id).expect("observation");
            backup::write_backup(&self.config.backup_dir, &path, obs)
        };
        match result {
            Ok(()) => {
                let obs = self.observation_mut(id).expect("observation");
                obs.backup_dirty = false;
                obs.last_backup = now;
            }
            Err(e) => tracing::error!("buffer backup for '{}' failed: {}", path, e),
        }
    }

    fn restore_backup(&mut self, id: EntryId) {
        let path = self.tree.absolute_path(id);
        match backup::read_backup(&self.config.backup_dir, &path) {
            Ok(Some(restored)) => {
                let last = restored.samples.last().cloned();
                let data_type = restored.data_type;
                {
                    let obs = self.observation_mut(id).expect("observation");
                    obs.set_buffer_max(restored.buffer_max);
                    obs.buffer_type = data_type;
                    obs.buffer = restored.samples.into();
                    obs.last_accepted_ts = last.as_ref().map(|s| s.timestamp());
                }
                if let Some(sample) = last {
                    let body = self.tree.resource_mut(id).unwrap();
                    body.current = Some(sample);
                    body.current_type = data_type;
                }
                tracing::info!("restored buffer backup for '{}'", path);
            }
            Ok(None) => {}
            Err(e) => tracing::error!("failed to restore backup for '{}': {}", path, e),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new(HubConfig::default())
    }
}
