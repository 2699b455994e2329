// Eidos Error Kinds
//
// Precise, locally-raised conditions. None are recovered internally; they
// propagate to the caller of the top-level registry, slot, or dispatch
// operation. Names are resolved to strings at raise time so errors stay
// self-describing without a symbol table in hand.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObjectError {
    #[error("unknown parent class `{0}`")]
    UnknownParent(String),

    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("slot `{slot}` conflicts with an inherited definition: {reason}")]
    DuplicateSlotConflict { slot: String, reason: String },

    #[error("value for slot `{slot}` of class `{class}` does not satisfy its declared type")]
    InvalidSlotType { class: String, slot: String },

    #[error("invalid slot name `{slot}` for class `{class}`")]
    InvalidSlotName { class: String, slot: String },

    #[error("slot `{slot}` of class `{class}` is unbound")]
    UnboundSlot { class: String, slot: String },

    #[error("no applicable method `{generic}` for {argument}")]
    NoApplicableMethod { generic: String, argument: String },

    #[error("generic function `{0}` has no method definitions")]
    NoMethodDefinition(String),

    #[error("no next method for `{0}`")]
    NoNextMethod(String),

    #[error("inconsistent class hierarchy while linearizing `{0}`")]
    InconsistentHierarchy(String),

    #[error("cannot instantiate abstract class `{0}`")]
    AbstractClass(String),

    #[error("invalid method definition for `{generic}`: {reason}")]
    InvalidMethodDefinition { generic: String, reason: String },
}
