//! Resource bodies.
//!
//! A resource tree entry that is not a plain Namespace owns a
//! [`ResourceBody`]: the state common to every resource kind (units,
//! current value, default, override, routing, push handlers, snapshot
//! flags, barrier-pending sample) plus a variant tail for Input/Output,
//! Observation or Placeholder.
//!
//! The set of kinds is closed, so the variant is a plain enum and dispatch
//! is a `match` — no trait objects on the push hot path.

pub mod observation;

use crate::handler::HandlerList;
use crate::sample::DataSample;
use crate::tree::EntryId;
use crate::types::{DataType, EntryType};
use observation::ObservationBody;
use std::rc::Rc;

/// A sample together with the data type it was pushed as.
pub(crate) type TypedSample = (DataType, Rc<DataSample>);

/// Input/Output tail: fixed declared type, direction, mandatory flag.
#[derive(Debug)]
pub(crate) struct IoBody {
    pub data_type: DataType,
    pub is_output: bool,
    /// Outputs default to mandatory; Inputs are never mandatory.
    pub mandatory: bool,
}

/// Variant tail of a resource body.
pub(crate) enum Variant {
    Io(IoBody),
    Observation(Box<ObservationBody>),
    Placeholder,
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Io(io) => write!(f, "Io({:?})", io),
            Variant::Observation(_) => write!(f, "Observation"),
            Variant::Placeholder => write!(f, "Placeholder"),
        }
    }
}

/// The body attached to a non-Namespace entry.
#[derive(Debug)]
pub(crate) struct ResourceBody {
    /// Units string, e.g. `degC`; empty means unspecified.
    pub units: String,
    /// Current value, shared with buffers and handler deliveries.
    pub current: Option<Rc<DataSample>>,
    /// Data type of the current value (for Observations and Placeholders
    /// this is the last-assigned type).
    pub current_type: DataType,
    pub default: Option<TypedSample>,
    pub override_: Option<TypedSample>,
    pub json_example: Option<Rc<DataSample>>,
    pub json_example_changed: bool,
    /// Upstream resource this one receives samples from.
    pub source: Option<EntryId>,
    /// Downstream resources whose declared source is this one, in
    /// installation order.
    pub dests: Vec<EntryId>,
    pub handlers: HandlerList,
    /// Latest sample collapsed while an update barrier covers this
    /// resource; flushed on end-of-update.
    pub pending: Option<TypedSample>,
    /// Set when this resource's routing or filter settings were changed
    /// while an update barrier is active.
    pub update_pending: bool,
    pub variant: Variant,
}

impl ResourceBody {
    fn new(units: &str, variant: Variant) -> ResourceBody {
        ResourceBody {
            units: units.to_string(),
            current: None,
            current_type: DataType::Trigger,
            default: None,
            override_: None,
            json_example: None,
            json_example_changed: false,
            source: None,
            dests: Vec::new(),
            handlers: HandlerList::default(),
            pending: None,
            update_pending: false,
            variant,
        }
    }

    pub fn new_input(data_type: DataType, units: &str) -> ResourceBody {
        let mut body = Self::new(
            units,
            Variant::Io(IoBody {
                data_type,
                is_output: false,
                mandatory: false,
            }),
        );
        body.current_type = data_type;
        body
    }

    pub fn new_output(data_type: DataType, units: &str) -> ResourceBody {
        let mut body = Self::new(
            units,
            Variant::Io(IoBody {
                data_type,
                is_output: true,
                mandatory: true,
            }),
        );
        body.current_type = data_type;
        body
    }

    pub fn new_observation() -> ResourceBody {
        Self::new("", Variant::Observation(Box::new(ObservationBody::new())))
    }

    pub fn new_placeholder() -> ResourceBody {
        Self::new("", Variant::Placeholder)
    }

    pub fn entry_type(&self) -> EntryType {
        match &self.variant {
            Variant::Io(io) if io.is_output => EntryType::Output,
            Variant::Io(_) => EntryType::Input,
            Variant::Observation(_) => EntryType::Observation,
            Variant::Placeholder => EntryType::Placeholder,
        }
    }

    /// The data type this resource currently has. Inputs and Outputs keep
    /// the declared type set at creation; other resources track the type of
    /// whatever was last assigned to them.
    pub fn data_type(&self) -> DataType {
        match &self.variant {
            Variant::Io(io) => io.data_type,
            _ => self.current_type,
        }
    }

    pub fn io(&self) -> Option<&IoBody> {
        match &self.variant {
            Variant::Io(io) => Some(io),
            _ => None,
        }
    }

    pub fn io_mut(&mut self) -> Option<&mut IoBody> {
        match &mut self.variant {
            Variant::Io(io) => Some(io),
            _ => None,
        }
    }

    pub fn observation(&self) -> Option<&ObservationBody> {
        match &self.variant {
            Variant::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn observation_mut(&mut self) -> Option<&mut ObservationBody> {
        match &mut self.variant {
            Variant::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    /// Whether administrative settings survive on this resource: a
    /// default, an override, or routing in either direction. Used to
    /// decide between a Placeholder downgrade and a full delete.
    pub fn has_admin_settings(&self) -> bool {
        self.default.is_some()
            || self.override_.is_some()
            || self.source.is_some()
            || !self.dests.is_empty()
    }

    /// Move administrative settings from a body being replaced into its
    /// replacement. Variant-specific settings with no counterpart on the
    /// target (e.g. Observation filters moving onto a Placeholder) are
    /// discarded.
    pub fn move_admin_settings(from: ResourceBody, to: &mut ResourceBody) {
        to.default = from.default;
        to.override_ = from.override_;
        to.source = from.source;
        to.dests = from.dests;
        to.json_example = from.json_example;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_mandatory_by_default() {
        let output = ResourceBody::new_output(DataType::Numeric, "V");
        assert!(output.io().unwrap().mandatory);

        let input = ResourceBody::new_input(DataType::Numeric, "V");
        assert!(!input.io().unwrap().mandatory);
    }

    #[test]
    fn test_entry_types() {
        assert_eq!(
            ResourceBody::new_input(DataType::Boolean, "").entry_type(),
            EntryType::Input
        );
        assert_eq!(
            ResourceBody::new_output(DataType::Boolean, "").entry_type(),
            EntryType::Output
        );
        assert_eq!(
            ResourceBody::new_observation().entry_type(),
            EntryType::Observation
        );
        assert_eq!(
            ResourceBody::new_placeholder().entry_type(),
            EntryType::Placeholder
        );
    }

    #[test]
    fn test_io_data_type_is_declared() {
        let mut io = ResourceBody::new_input(DataType::Numeric, "");
        io.current_type = DataType::Json;
        assert_eq!(io.data_type(), DataType::Numeric);

        let mut obs = ResourceBody::new_observation();
        obs.current_type = DataType::Json;
        assert_eq!(obs.data_type(), DataType::Json);
    }

    #[test]
    fn test_move_admin_settings() {
        let mut from = ResourceBody::new_observation();
        from.default = Some((DataType::Numeric, DataSample::numeric(1.0, 5.0)));
        from.source = Some(EntryId(7));
        from.current = Some(DataSample::numeric(2.0, 6.0));

        let mut to = ResourceBody::new_placeholder();
        ResourceBody::move_admin_settings(from, &mut to);

        assert!(to.default.is_some());
        assert_eq!(to.source, Some(EntryId(7)));
        // Current value does not migrate.
        assert!(to.current.is_none());
    }

    #[test]
    fn test_has_admin_settings() {
        let mut body = ResourceBody::new_input(DataType::Numeric, "");
        assert!(!body.has_admin_settings());
        body.override_ = Some((DataType::Numeric, DataSample::numeric(0.0, 1.0)));
        assert!(body.has_admin_settings());
    }
}
