// Eidos Object System
//
// The process-wide state record: symbol table, class table, instance store,
// generic-function table, type-predicate registry, hook set, and the
// explicit call stacks used by dispatch. Single-threaded by contract;
// re-entrancy comes only from nested dispatch on the same call stack.

use crate::dispatch::{GenericFunction, GenericId, NextFrame};
use crate::hooks::Hooks;
use crate::registry::{Class, ClassId, ClassOptions, TypeSpec};
use crate::slots::Instance;
use crate::symbol::{SymbolId, SymbolTable};
use crate::value::Value;
use std::collections::HashMap;

/// Name of the implicit root class every parentless class inherits from.
pub const ROOT_CLASS_NAME: &str = "standard-object";

/// Type predicate registered under a symbol and referenced from slot
/// declarations via `TypeSpec::Predicate`.
pub type TypePredicate = fn(&Value) -> bool;

pub struct ObjectSystem {
    /// Interned names
    pub symbols: SymbolTable,
    /// All classes
    pub(crate) classes: Vec<Class>,
    /// Class name -> ClassId lookup
    pub(crate) class_names: HashMap<SymbolId, ClassId>,
    /// All instances
    pub(crate) instances: Vec<Instance>,
    /// All generic functions
    pub(crate) generics: Vec<GenericFunction>,
    /// Generic name -> GenericId lookup
    pub(crate) generic_names: HashMap<SymbolId, GenericId>,
    /// Registered slot-type predicates
    pub(crate) type_predicates: HashMap<SymbolId, TypePredicate>,
    /// Extension-point callbacks
    pub(crate) hooks: Hooks,
    /// Specializing class of each method currently on the call stack,
    /// innermost last; None for unspecialized methods
    pub(crate) scope_stack: Vec<Option<ClassId>>,
    /// Remaining next-method chains, innermost last
    pub(crate) next_frames: Vec<NextFrame>,
    /// Global type-checking toggle; when off, slot type and unbound checks
    /// are skipped entirely
    pub(crate) type_checking: bool,
    /// The root class
    pub root_class: ClassId,
}

impl ObjectSystem {
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        let root_name = symbols.intern(ROOT_CLASS_NAME);

        let root = Class {
            name: root_name,
            parents: Vec::new(),
            children: Vec::new(),
            direct_slots: Vec::new(),
            slots: Vec::new(),
            slot_index: HashMap::new(),
            initarg_index: HashMap::new(),
            class_values: Vec::new(),
            template: Vec::new(),
            instance_size: 0,
            mro: Default::default(),
            cpl: vec![ClassId(0)],
            options: ClassOptions::default(),
        };

        let mut class_names = HashMap::new();
        class_names.insert(root_name, ClassId(0));

        let mut system = Self {
            symbols,
            classes: vec![root],
            class_names,
            instances: Vec::new(),
            generics: Vec::new(),
            generic_names: HashMap::new(),
            type_predicates: HashMap::new(),
            hooks: Hooks::default(),
            scope_stack: Vec::new(),
            next_frames: Vec::new(),
            type_checking: true,
            root_class: ClassId(0),
        };
        system.register_builtin_predicates();
        system
    }

    fn register_builtin_predicates(&mut self) {
        let builtins: &[(&str, TypePredicate)] = &[
            ("integer", |v| {
                matches!(v, Value::Integer(_) | Value::BigInt(_))
            }),
            ("float", |v| matches!(v, Value::Float(_))),
            ("number", Value::is_number),
            ("string", |v| matches!(v, Value::Str(_))),
            ("symbol", |v| matches!(v, Value::Symbol(_))),
            ("boolean", |v| matches!(v, Value::Bool(_))),
            ("list", |v| matches!(v, Value::List(_))),
        ];
        for &(name, pred) in builtins {
            let sym = self.symbols.intern(name);
            self.type_predicates.insert(sym, pred);
        }
    }

    /// Intern a name in the system's symbol table.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    /// Register (or replace) a slot-type predicate.
    pub fn register_type_predicate(&mut self, name: SymbolId, predicate: TypePredicate) {
        self.type_predicates.insert(name, predicate);
    }

    /// Mutable access to the extension-point hook set.
    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Toggle global type checking. While disabled, slot type validation and
    /// unbound-read checks are skipped (the trusted fast path).
    pub fn set_type_checking(&mut self, enabled: bool) {
        self.type_checking = enabled;
    }

    pub fn type_checking(&self) -> bool {
        self.type_checking
    }

    /// The specializing class of the innermost executing method, if any.
    /// Slot protection is judged against it.
    pub fn scoped_class(&self) -> Option<ClassId> {
        self.scope_stack.last().copied().flatten()
    }

    /// Check a value against a declared slot type. Unregistered predicate
    /// names accept anything; an InstanceOf naming an unregistered class
    /// accepts nothing.
    pub(crate) fn check_type(&self, ty: &TypeSpec, value: &Value) -> bool {
        match ty {
            TypeSpec::Any => true,
            TypeSpec::Predicate(name) => match self.type_predicates.get(name) {
                Some(pred) => pred(value),
                None => true,
            },
            TypeSpec::InstanceOf(class_name) => match (value, self.lookup_class(*class_name)) {
                (Value::Instance(id), Some(want)) => self
                    .instance_class(*id)
                    .map(|actual| self.class_is_a(actual, want))
                    .unwrap_or(false),
                _ => false,
            },
        }
    }

    /// Human-readable rendition of a value for error messages.
    pub(crate) fn describe(&self, value: &Value) -> String {
        match value {
            Value::Symbol(id) => format!("`{}`", self.symbols.name(*id)),
            Value::Class(id) => format!("#<class {}>", self.class_name(*id)),
            Value::Instance(id) => match self.instance_class(*id) {
                Some(class) => format!("#<instance of {}>", self.class_name(class)),
                None => format!("#<instance {}>", id.0),
            },
            other => other.to_string(),
        }
    }
}

impl Default for ObjectSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_root_class() {
        let system = ObjectSystem::new();
        let root = system.get_class(system.root_class).unwrap();
        assert!(root.parents.is_empty());
        assert_eq!(root.cpl, vec![system.root_class]);
        assert_eq!(system.symbols.name(root.name), ROOT_CLASS_NAME);
    }

    #[test]
    fn test_builtin_predicates() {
        let mut system = ObjectSystem::new();
        let integer = system.intern("integer");
        let ty = TypeSpec::Predicate(integer);
        assert!(system.check_type(&ty, &Value::Integer(3)));
        assert!(!system.check_type(&ty, &Value::Str("3".into())));
        // Unregistered predicate names accept anything.
        let unknown = system.intern("widget");
        assert!(system.check_type(&TypeSpec::Predicate(unknown), &Value::Nil));
    }
}
