// Eidos: Embedded Dynamic Object System
//
// Classes with multiple inheritance, typed and protected slots, and
// CLOS-style generic functions dispatched by the runtime class of their
// first argument.

pub mod symbol;
pub mod value;
pub mod error;
pub mod hooks;
pub mod mro;
pub mod registry;
pub mod slots;
pub mod dispatch;
pub mod system;

pub use dispatch::{GenericId, MethodBody, Qualifier};
pub use error::ObjectError;
pub use hooks::{Hooks, SlotAccess};
pub use mro::MroPolicy;
pub use registry::{
    ClassId, ClassOptions, SlotAllocation, SlotDeclaration, SlotDefault, SlotProtection,
    TypeSpec,
};
pub use slots::InstanceId;
pub use symbol::SymbolId;
pub use system::ObjectSystem;
pub use value::Value;
