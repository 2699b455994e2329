// Eidos Extension Points
//
// Callback seams supplied by the surrounding system. Each hook is optional;
// the core falls back to raising the corresponding error when a hook is
// absent. Hooks receive the system mutably so they may dispatch back into it.

use crate::error::ObjectError;
use crate::registry::ClassId;
use crate::slots::InstanceId;
use crate::symbol::SymbolId;
use crate::system::ObjectSystem;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

/// Whether a slot access that could not be resolved was a read or a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAccess {
    Read,
    Write,
}

/// Invoked when a slot name cannot be resolved on an instance (including
/// protection violations, which degrade to "missing" by design). For reads
/// the returned value substitutes for the slot's; for writes returning Ok
/// silently accepts the value.
pub type SlotMissingFn = Rc<
    dyn Fn(
        &mut ObjectSystem,
        InstanceId,
        SymbolId,
        SlotAccess,
        Option<&Value>,
    ) -> Result<Value, ObjectError>,
>;

/// Invoked when a read finds the unbound marker. The `accessor` names the
/// operation that tripped the check. Expected to fail the call, but may
/// substitute a value.
pub type SlotUnboundFn = Rc<
    dyn Fn(
        &mut ObjectSystem,
        InstanceId,
        ClassId,
        SymbolId,
        &'static str,
    ) -> Result<Value, ObjectError>,
>;

/// Invoked when dispatch finds no implementation at all. Expected to fail
/// the call, but may substitute a result.
pub type NoApplicableMethodFn = Rc<
    dyn Fn(&mut ObjectSystem, &Value, SymbolId, &[Value]) -> Result<Value, ObjectError>,
>;

/// Evaluates a slot's stored default expression into a concrete value at
/// template-build or reset time. Without one, the stored expression is used
/// as the value.
pub type DefaultEvaluatorFn = Rc<dyn Fn(&Value) -> Value>;

/// The hook set carried by an ObjectSystem.
#[derive(Default, Clone)]
pub struct Hooks {
    pub slot_missing: Option<SlotMissingFn>,
    pub slot_unbound: Option<SlotUnboundFn>,
    pub no_applicable_method: Option<NoApplicableMethodFn>,
    pub default_evaluator: Option<DefaultEvaluatorFn>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("slot_missing", &self.slot_missing.is_some())
            .field("slot_unbound", &self.slot_unbound.is_some())
            .field("no_applicable_method", &self.no_applicable_method.is_some())
            .field("default_evaluator", &self.default_evaluator.is_some())
            .finish()
    }
}
