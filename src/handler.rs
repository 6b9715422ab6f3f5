//! Registered push-handler bookkeeping.
//!
//! Each resource owns a list of push handlers. Handlers are invoked in
//! registration order, synchronously, and receive the sample converted to
//! the data type they requested. A handler callback never receives access
//! to the hub itself, so dispatch cannot re-enter the tree.

use crate::sample::Value;
use crate::types::DataType;

/// Identifies a registered handler (push, update start/end, or tree change)
/// so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Callback signature for push handlers: `(timestamp, value)`, where the
/// value has already been converted to the handler's requested type.
pub type PushCallback = Box<dyn FnMut(f64, &Value)>;

pub(crate) struct PushHandler {
    pub id: HandlerId,
    pub data_type: DataType,
    pub callback: PushCallback,
}

/// Registration-ordered list of push handlers on one resource.
#[derive(Default)]
pub(crate) struct HandlerList {
    handlers: Vec<PushHandler>,
}

impl HandlerList {
    pub fn add(&mut self, id: HandlerId, data_type: DataType, callback: PushCallback) {
        self.handlers.push(PushHandler {
            id,
            data_type,
            callback,
        });
    }

    /// Remove a handler by id. Returns whether it was present.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.id != id);
        self.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Requested data type of each handler, in registration order. Dispatch
    /// uses this to precompute conversions before invoking callbacks.
    pub fn requested_types(&self) -> Vec<(usize, DataType)> {
        self.handlers
            .iter()
            .enumerate()
            .map(|(i, h)| (i, h.data_type))
            .collect()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PushHandler> {
        self.handlers.get_mut(index)
    }
}

impl std::fmt::Debug for HandlerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerList")
            .field("len", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_registration_order_preserved() {
        let mut list = HandlerList::default();
        list.add(HandlerId(1), DataType::Numeric, Box::new(|_, _| {}));
        list.add(HandlerId(2), DataType::String, Box::new(|_, _| {}));
        list.add(HandlerId(3), DataType::Numeric, Box::new(|_, _| {}));

        let types: Vec<DataType> = list.requested_types().into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            types,
            vec![DataType::Numeric, DataType::String, DataType::Numeric]
        );
    }

    #[test]
    fn test_remove() {
        let mut list = HandlerList::default();
        list.add(HandlerId(1), DataType::Boolean, Box::new(|_, _| {}));
        list.add(HandlerId(2), DataType::Boolean, Box::new(|_, _| {}));

        assert!(list.remove(HandlerId(1)));
        assert!(!list.remove(HandlerId(1)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_callback_invocation() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);

        let mut list = HandlerList::default();
        list.add(
            HandlerId(1),
            DataType::Numeric,
            Box::new(move |ts, value| {
                if let Value::Numeric(v) = value {
                    seen_clone.borrow_mut().push((ts, *v));
                }
            }),
        );

        let handler = list.get_mut(0).unwrap();
        (handler.callback)(10.0, &Value::Numeric(1.5));
        assert_eq!(*seen.borrow(), vec![(10.0, 1.5)]);
    }
}
