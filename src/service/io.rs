//! The per-client I/O service.
//!
//! Each client app works inside its own `/app/<name>` namespace: it creates
//! Input and Output resources there, pushes samples, reads current values
//! and registers push handlers. The namespace name defaults to the client
//! identifier; overriding it is permitted only on non-hosted deployments.

use crate::error::{HubError, Result};
use crate::handler::HandlerId;
use crate::hub::Hub;
use crate::sample::{DataSample, Value};
use crate::tree::EntryId;
use crate::types::{DataType, EntryType};

/// I/O facade bound to one client's namespace.
pub struct IoService<'a> {
    hub: &'a mut Hub,
    client: String,
    namespace: EntryId,
}

impl<'a> IoService<'a> {
    pub fn new(hub: &'a mut Hub, client: &str) -> Result<IoService<'a>> {
        let namespace = hub.client_namespace(client)?;
        Ok(IoService {
            hub,
            client: client.to_string(),
            namespace,
        })
    }

    /// Override the client's namespace for subsequent calls.
    pub fn set_namespace(&mut self, namespace: &str) -> Result<()> {
        self.hub.set_client_namespace(&self.client, namespace)?;
        self.namespace = self.hub.client_namespace(&self.client)?;
        Ok(())
    }

    /// The resource at a path within the client's namespace, if it is an
    /// Input or an Output.
    fn find_resource(&self, path: &str) -> Result<EntryId> {
        let id = self
            .hub
            .find_entry(self.namespace, path)
            .ok_or(HubError::NotFound)?;
        match self.hub.entry_type(id) {
            EntryType::Input | EntryType::Output => Ok(id),
            _ => {
                tracing::debug!("'{}' is not an Input or an Output", path);
                Err(HubError::NotFound)
            }
        }
    }

    pub fn create_input(&mut self, path: &str, data_type: DataType, units: &str) -> Result<()> {
        tracing::debug!("create input '{}' <{}> '{}'", path, data_type.name(), units);
        self.hub
            .create_input(self.namespace, path, data_type, units)?;
        Ok(())
    }

    pub fn create_output(&mut self, path: &str, data_type: DataType, units: &str) -> Result<()> {
        tracing::debug!("create output '{}' <{}> '{}'", path, data_type.name(), units);
        self.hub
            .create_output(self.namespace, path, data_type, units)?;
        Ok(())
    }

    /// Delete a resource. Admin settings, if any, survive on a Placeholder.
    pub fn delete_resource(&mut self, path: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub.delete_io(id)
    }

    // ── Pushes ──

    pub fn push_trigger(&mut self, path: &str, timestamp: f64) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .push(id, DataType::Trigger, DataSample::trigger(timestamp))
    }

    pub fn push_boolean(&mut self, path: &str, timestamp: f64, value: bool) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .push(id, DataType::Boolean, DataSample::boolean(timestamp, value))
    }

    pub fn push_numeric(&mut self, path: &str, timestamp: f64, value: f64) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .push(id, DataType::Numeric, DataSample::numeric(timestamp, value))
    }

    pub fn push_string(&mut self, path: &str, timestamp: f64, value: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .push(id, DataType::String, DataSample::string(timestamp, value)?)
    }

    pub fn push_json(&mut self, path: &str, timestamp: f64, value: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .push(id, DataType::Json, DataSample::json(timestamp, value)?)
    }

    // ── Defaults and examples ──

    pub fn set_boolean_default(&mut self, path: &str, value: bool) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .set_default(id, DataType::Boolean, DataSample::boolean(0.0, value))
    }

    pub fn set_numeric_default(&mut self, path: &str, value: f64) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .set_default(id, DataType::Numeric, DataSample::numeric(0.0, value))
    }

    pub fn set_string_default(&mut self, path: &str, value: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .set_default(id, DataType::String, DataSample::string(0.0, value)?)
    }

    pub fn set_json_default(&mut self, path: &str, value: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub
            .set_default(id, DataType::Json, DataSample::json(0.0, value)?)
    }

    /// Set the example value for a JSON-type Input.
    pub fn set_json_example(&mut self, path: &str, example: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        if self.hub.entry_type(id) != EntryType::Input {
            return Err(HubError::BadParameter(format!(
                "'{}' is not an input",
                path
            )));
        }
        if self.hub.data_type(id) != Some(DataType::Json) {
            return Err(HubError::BadParameter(format!(
                "'{}' does not have JSON data type",
                path
            )));
        }
        self.hub
            .set_json_example(id, DataSample::json(0.0, example)?)
    }

    /// Mark an Output "optional". Outputs are mandatory by default.
    pub fn mark_optional(&mut self, path: &str) -> Result<()> {
        let id = self.find_resource(path)?;
        self.hub.mark_optional(id)
    }

    // ── Getters ──

    pub fn get_timestamp(&self, path: &str) -> Result<f64> {
        let id = self.find_resource(path)?;
        self.hub.get_timestamp(id)
    }

    pub fn get_boolean(&self, path: &str) -> Result<bool> {
        let id = self.find_resource(path)?;
        self.hub.get_boolean(id)
    }

    pub fn get_numeric(&self, path: &str) -> Result<f64> {
        let id = self.find_resource(path)?;
        self.hub.get_numeric(id)
    }

    pub fn get_string(&self, path: &str) -> Result<String> {
        let id = self.find_resource(path)?;
        self.hub.get_string(id)
    }

    pub fn get_json(&self, path: &str) -> Result<String> {
        let id = self.find_resource(path)?;
        self.hub.get_json(id)
    }

    // ── Push handlers ──

    pub fn add_trigger_push_handler(
        &mut self,
        path: &str,
        mut callback: impl FnMut(f64) + 'static,
    ) -> Result<HandlerId> {
        let id = self.find_resource(path)?;
        self.hub.add_push_handler(
            id,
            DataType::Trigger,
            Box::new(move |ts, _| callback(ts)),
        )
    }

    pub fn add_boolean_push_handler(
        &mut self,
        path: &str,
        mut callback: impl FnMut(f64, bool) + 'static,
    ) -> Result<HandlerId> {
        let id = self.find_resource(path)?;
        self.hub.add_push_handler(
            id,
            DataType::Boolean,
            Box::new(move |ts, value| {
                if let Value::Bool(v) = value {
                    callback(ts, *v);
                }
            }),
        )
    }

    pub fn add_numeric_push_handler(
        &mut self,
        path: &str,
        mut callback: impl FnMut(f64, f64) + 'static,
    ) -> Result<HandlerId> {
        let id = self.find_resource(path)?;
        self.hub.add_push_handler(
            id,
            DataType::Numeric,
            Box::new(move |ts, value| {
                if let Value::Numeric(v) = value {
                    callback(ts, *v);
                }
            }),
        )
    }

    pub fn add_string_push_handler(
        &mut self,
        path: &str,
        mut callback: impl FnMut(f64, &str) + 'static,
    ) -> Result<HandlerId> {
        let id = self.find_resource(path)?;
        self.hub.add_push_handler(
            id,
            DataType::String,
            Box::new(move |ts, value| {
                if let Value::String(v) = value {
                    callback(ts, v);
                }
            }),
        )
    }

    pub fn add_json_push_handler(
        &mut self,
        path: &str,
        mut callback: impl FnMut(f64, &str) + 'static,
    ) -> Result<HandlerId> {
        let id = self.find_resource(path)?;
        self.hub.add_push_handler(
            id,
            DataType::Json,
            Box::new(move |ts, value| {
                if let Value::Json(v) = value {
                    callback(ts, v);
                }
            }),
        )
    }

    pub fn remove_push_handler(&mut self, handler: HandlerId) -> Result<()> {
        self.hub.remove_push_handler(handler)
    }

    pub fn add_update_start_end_handler(
        &mut self,
        callback: impl FnMut(bool) + 'static,
    ) -> HandlerId {
        self.hub.add_update_handler(Box::new(callback))
    }

    pub fn remove_update_start_end_handler(&mut self, handler: HandlerId) {
        self.hub.remove_update_handler(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_create_push_get() {
        let mut hub = Hub::default();
        let mut io = IoService::new(&mut hub, "sensor").unwrap();

        io.create_input("temp", DataType::Numeric, "degC").unwrap();
        io.push_numeric("temp", 100.0, 21.5).unwrap();

        assert_eq!(io.get_numeric("temp").unwrap(), 21.5);
        assert_eq!(io.get_timestamp("temp").unwrap(), 100.0);

        // The resource lives under the client's namespace.
        assert!(hub.find_absolute("/app/sensor/temp").is_some());
    }

    #[test]
    fn test_push_to_missing_resource() {
        let mut hub = Hub::default();
        let mut io = IoService::new(&mut hub, "sensor").unwrap();
        assert!(matches!(
            io.push_numeric("nope", 1.0, 1.0),
            Err(HubError::NotFound)
        ));
    }

    #[test]
    fn test_create_input_duplicate() {
        let mut hub = Hub::default();
        let mut io = IoService::new(&mut hub, "sensor").unwrap();
        io.create_input("temp", DataType::Numeric, "degC").unwrap();
        // Idempotent on an exact match.
        io.create_input("temp", DataType::Numeric, "degC").unwrap();
        assert!(matches!(
            io.create_input("temp", DataType::Boolean, "degC"),
            Err(HubError::Duplicate(_))
        ));
    }

    #[test]
    fn test_set_namespace_not_permitted_by_default() {
        let mut hub = Hub::default();
        let mut io = IoService::new(&mut hub, "app1").unwrap();
        assert!(matches!(
            io.set_namespace("other"),
            Err(HubError::NotPermitted)
        ));
    }

    #[test]
    fn test_set_namespace_on_open_deployment() {
        let mut config = crate::hub::HubConfig::default();
        config.allow_namespace_override = true;
        let mut hub = Hub::new(config);

        let mut io = IoService::new(&mut hub, "app1").unwrap();
        io.set_namespace("shared").unwrap();
        io.create_input("x", DataType::Numeric, "").unwrap();
        assert!(hub.find_absolute("/app/shared/x").is_some());
    }

    #[test]
    fn test_typed_handlers() {
        let mut hub = Hub::default();
        let mut io = IoService::new(&mut hub, "a").unwrap();
        io.create_input("n", DataType::Numeric, "").unwrap();

        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        // A string handler on a numeric input receives the printable form.
        io.add_string_push_handler("n", move |_, s| {
            sink.borrow_mut().push(s.to_string());
        })
        .unwrap();

        io.push_numeric("n", 1.0, 4.5).unwrap();
        assert_eq!(*seen.borrow(), vec!["4.500000".to_string()]);
    }

    #[test]
    fn test_json_example_requires_json_input() {
        let mut hub = Hub::default();
        let mut io = IoService::new(&mut hub, "a").unwrap();
        io.create_input("n", DataType::Numeric, "").unwrap();
        io.create_input("j", DataType::Json, "").unwrap();

        assert!(matches!(
            io.set_json_example("n", "{}"),
            Err(HubError::BadParameter(_))
        ));
        io.set_json_example("j", "{\"x\":1}").unwrap();
    }
}
