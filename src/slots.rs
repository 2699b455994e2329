// Eidos Slot Store & Validator
//
// Per-instance storage laid out positionally from the owning class's
// finalized schema. Reads and writes enforce protection against the
// currently dispatched class and validate values against declared types.
// Protection violations degrade to the slot-missing extension point rather
// than a hard error.

use crate::error::ObjectError;
use crate::hooks::SlotAccess;
use crate::registry::{ClassId, SlotAllocation, SlotDefault, SlotProtection};
use crate::symbol::SymbolId;
use crate::system::ObjectSystem;
use crate::value::Value;

/// Unique identifier for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u32);

/// An instance of a class. Owns one storage cell per per-instance slot of
/// its class (inherited ones included); holds a non-owning class reference.
#[derive(Debug, Clone)]
pub struct Instance {
    pub class: ClassId,
    pub slots: Vec<Value>,
}

/// Copied-out view of one schema entry, so slot operations can drop the
/// class borrow before running hooks.
#[derive(Debug, Clone, Copy)]
struct ResolvedSlot {
    pos: usize,
    index: usize,
    allocation: SlotAllocation,
    protection: SlotProtection,
    origin: ClassId,
}

impl ObjectSystem {
    /// Create an instance of a class from its default-instance template,
    /// then apply `initargs` (matched by initarg name, falling back to slot
    /// name). Construction writes are type-validated but protection-exempt.
    pub fn make_instance(
        &mut self,
        class: ClassId,
        initargs: &[(SymbolId, Value)],
    ) -> Result<InstanceId, ObjectError> {
        let record = self
            .get_class(class)
            .ok_or_else(|| ObjectError::UnknownClass(self.class_name(class)))?;
        if record.options.abstract_class {
            return Err(ObjectError::AbstractClass(self.class_name(class)));
        }

        let slots = record.template.clone();
        let id = InstanceId(self.instances.len() as u32);
        self.instances.push(Instance { class, slots });

        for (name, value) in initargs {
            let record = &self.classes[class.0 as usize];
            match record
                .initarg_index
                .get(name)
                .or_else(|| record.slot_index.get(name))
                .copied()
            {
                Some(pos) => self.write_resolved(id, pos, value.clone())?,
                None => {
                    self.missing(id, *name, SlotAccess::Write, Some(value))?;
                }
            }
        }

        Ok(id)
    }

    /// Get an instance by id.
    pub fn get_instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0 as usize)
    }

    /// The most-derived class of an instance.
    pub fn instance_class(&self, id: InstanceId) -> Option<ClassId> {
        self.instances.get(id.0 as usize).map(|i| i.class)
    }

    /// Check whether an instance is of a class (or a subclass of it).
    pub fn instance_of(&self, id: InstanceId, class: ClassId) -> bool {
        self.instance_class(id)
            .map(|actual| self.class_is_a(actual, class))
            .unwrap_or(false)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Read a slot. Resolution falls back to initarg names; protection
    /// violations and unknown names route through the slot-missing hook.
    /// Reading an unbound slot fails with UnboundSlot unless type checking
    /// is globally disabled.
    pub fn get(&mut self, instance: InstanceId, slot: SymbolId) -> Result<Value, ObjectError> {
        let class_id = match self.instance_class(instance) {
            Some(c) => c,
            None => return self.missing(instance, slot, SlotAccess::Read, None),
        };

        let resolved = match self.resolve_checked(class_id, slot) {
            Some(r) => r,
            None => return self.missing(instance, slot, SlotAccess::Read, None),
        };

        // Storage predating a class redefinition may be shorter than the
        // new layout; cells it never had read as unbound.
        let value = match resolved.allocation {
            SlotAllocation::Instance => self.instances[instance.0 as usize]
                .slots
                .get(resolved.index)
                .cloned()
                .unwrap_or(Value::Unbound),
            SlotAllocation::Class => self.classes[class_id.0 as usize]
                .class_values
                .get(resolved.index)
                .cloned()
                .unwrap_or(Value::Unbound),
        };

        if value.is_unbound() && self.type_checking {
            return self.unbound(instance, class_id, slot, "get");
        }
        Ok(value)
    }

    /// Write a slot under the same resolution and protection rules as
    /// `get`, validating the value against the slot's declared type.
    pub fn set(
        &mut self,
        instance: InstanceId,
        slot: SymbolId,
        value: Value,
    ) -> Result<(), ObjectError> {
        let class_id = match self.instance_class(instance) {
            Some(c) => c,
            None => {
                self.missing(instance, slot, SlotAccess::Write, Some(&value))?;
                return Ok(());
            }
        };

        match self.resolve_checked(class_id, slot) {
            Some(resolved) => self.write_resolved(instance, resolved.pos, value),
            None => {
                self.missing(instance, slot, SlotAccess::Write, Some(&value))?;
                Ok(())
            }
        }
    }

    /// True when the named slot holds a value (not the unbound marker).
    pub fn slot_bound_p(
        &mut self,
        instance: InstanceId,
        slot: SymbolId,
    ) -> Result<bool, ObjectError> {
        let class_id = match self.instance_class(instance) {
            Some(c) => c,
            None => {
                return Err(ObjectError::InvalidSlotName {
                    class: "#<dead-instance>".to_string(),
                    slot: self.symbols.name(slot).to_string(),
                })
            }
        };
        match self.resolve_checked(class_id, slot) {
            Some(resolved) => {
                let value = match resolved.allocation {
                    SlotAllocation::Instance => self.instances[instance.0 as usize]
                        .slots
                        .get(resolved.index),
                    SlotAllocation::Class => self.classes[class_id.0 as usize]
                        .class_values
                        .get(resolved.index),
                };
                Ok(value.map(|v| !v.is_unbound()).unwrap_or(false))
            }
            None => Err(ObjectError::InvalidSlotName {
                class: self.class_name(class_id),
                slot: self.symbols.name(slot).to_string(),
            }),
        }
    }

    /// Return the named slot to the unbound state.
    pub fn slot_make_unbound(
        &mut self,
        instance: InstanceId,
        slot: SymbolId,
    ) -> Result<(), ObjectError> {
        self.set(instance, slot, Value::Unbound)
    }

    /// Reinitialize every per-instance slot from the class's stored
    /// defaults. Deferred defaults are evaluated fresh on every call. When
    /// `set_all` is false, slots whose freshly-evaluated default is nil are
    /// left untouched.
    pub fn reset_to_defaults(
        &mut self,
        instance: InstanceId,
        set_all: bool,
    ) -> Result<(), ObjectError> {
        let class_id = self.instance_class(instance).ok_or_else(|| {
            ObjectError::UnknownClass("#<dead-instance>".to_string())
        })?;

        let per_instance: Vec<usize> = self.classes[class_id.0 as usize]
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.allocation == SlotAllocation::Instance)
            .map(|(pos, _)| pos)
            .collect();

        for pos in per_instance {
            let default = self.classes[class_id.0 as usize].slots[pos].default.clone();
            let value = self.evaluate_default(&default);
            if value.is_nil() && !set_all {
                continue;
            }
            self.write_resolved(instance, pos, value)?;
        }
        Ok(())
    }

    /// Read a slot directly off a class: the shared storage for a per-class
    /// slot, the freshly-evaluated stored default for a per-instance slot.
    pub fn get_class_slot(
        &mut self,
        class: ClassId,
        slot: SymbolId,
    ) -> Result<Value, ObjectError> {
        let resolved = self.resolve_checked(class, slot).ok_or_else(|| {
            ObjectError::InvalidSlotName {
                class: self.class_name(class),
                slot: self.symbols.name(slot).to_string(),
            }
        })?;

        let value = match resolved.allocation {
            SlotAllocation::Class => {
                self.classes[class.0 as usize].class_values[resolved.index].clone()
            }
            SlotAllocation::Instance => {
                let default = self.classes[class.0 as usize].slots[resolved.pos]
                    .default
                    .clone();
                self.evaluate_default(&default)
            }
        };

        if value.is_unbound() && self.type_checking {
            return Err(ObjectError::UnboundSlot {
                class: self.class_name(class),
                slot: self.symbols.name(slot).to_string(),
            });
        }
        Ok(value)
    }

    /// Write a slot directly on a class: the shared storage for a per-class
    /// slot, the stored default (and template cell) for a per-instance slot.
    pub fn set_class_slot(
        &mut self,
        class: ClassId,
        slot: SymbolId,
        value: Value,
    ) -> Result<(), ObjectError> {
        let resolved = self.resolve_checked(class, slot).ok_or_else(|| {
            ObjectError::InvalidSlotName {
                class: self.class_name(class),
                slot: self.symbols.name(slot).to_string(),
            }
        })?;

        self.validate_slot_value(class, resolved.pos, &value)?;

        let record = &mut self.classes[class.0 as usize];
        match resolved.allocation {
            SlotAllocation::Class => {
                record.class_values[resolved.index] = value;
            }
            SlotAllocation::Instance => {
                record.slots[resolved.pos].default = SlotDefault::Literal(value.clone());
                record.template[resolved.index] = value;
            }
        }
        Ok(())
    }

    /// Resolve a slot name on a class and apply the protection rules
    /// against the currently scoped class. None means "treat as absent".
    fn resolve_checked(&self, class: ClassId, slot: SymbolId) -> Option<ResolvedSlot> {
        let record = self.classes.get(class.0 as usize)?;
        let pos = record.resolve_slot(slot)?;
        let schema = &record.slots[pos];
        let resolved = ResolvedSlot {
            pos,
            index: schema.index,
            allocation: schema.allocation,
            protection: schema.protection,
            origin: schema.origin,
        };

        let permitted = match resolved.protection {
            SlotProtection::Public => true,
            // Only methods specialized on the declaring class itself.
            SlotProtection::Private => self.scoped_class() == Some(resolved.origin),
            // The scoped class must be an ancestor-or-self of the slot's
            // declaring class, or the accessed class a descendant of the
            // scoped class.
            SlotProtection::Protected => match self.scoped_class() {
                Some(scope) => {
                    self.class_is_a(resolved.origin, scope) || self.class_is_a(class, scope)
                }
                None => false,
            },
        };
        permitted.then_some(resolved)
    }

    /// Validate a value against a slot's declared type. Skipped when the
    /// type accepts anything, when the value is the unbound marker, or when
    /// type checking is globally disabled.
    fn validate_slot_value(
        &self,
        class: ClassId,
        pos: usize,
        value: &Value,
    ) -> Result<(), ObjectError> {
        if !self.type_checking || value.is_unbound() {
            return Ok(());
        }
        let schema = &self.classes[class.0 as usize].slots[pos];
        if self.check_type(&schema.ty, value) {
            Ok(())
        } else {
            Err(ObjectError::InvalidSlotType {
                class: self.class_name(class),
                slot: self.symbols.name(schema.name).to_string(),
            })
        }
    }

    /// Write through an already-resolved schema position, validating the
    /// type but bypassing protection (construction and reset paths).
    fn write_resolved(
        &mut self,
        instance: InstanceId,
        pos: usize,
        value: Value,
    ) -> Result<(), ObjectError> {
        let class_id = self.instances[instance.0 as usize].class;
        self.validate_slot_value(class_id, pos, &value)?;
        let schema = &self.classes[class_id.0 as usize].slots[pos];
        let (allocation, index) = (schema.allocation, schema.index);
        // Storage predating a redefinition adopts the new layout on write.
        match allocation {
            SlotAllocation::Instance => {
                let cells = &mut self.instances[instance.0 as usize].slots;
                if index >= cells.len() {
                    cells.resize(index + 1, Value::Unbound);
                }
                cells[index] = value;
            }
            SlotAllocation::Class => {
                let cells = &mut self.classes[class_id.0 as usize].class_values;
                if index >= cells.len() {
                    cells.resize(index + 1, Value::Unbound);
                }
                cells[index] = value;
            }
        }
        Ok(())
    }

    /// Route an unresolvable or protection-blocked access through the
    /// slot-missing hook, or fail with InvalidSlotName.
    fn missing(
        &mut self,
        instance: InstanceId,
        slot: SymbolId,
        access: SlotAccess,
        value: Option<&Value>,
    ) -> Result<Value, ObjectError> {
        if let Some(hook) = self.hooks.slot_missing.clone() {
            return hook(self, instance, slot, access, value);
        }
        let class = self
            .instance_class(instance)
            .map(|c| self.class_name(c))
            .unwrap_or_else(|| "#<dead-instance>".to_string());
        Err(ObjectError::InvalidSlotName {
            class,
            slot: self.symbols.name(slot).to_string(),
        })
    }

    /// Route an unbound read through the slot-unbound hook, or fail with
    /// UnboundSlot.
    fn unbound(
        &mut self,
        instance: InstanceId,
        class: ClassId,
        slot: SymbolId,
        accessor: &'static str,
    ) -> Result<Value, ObjectError> {
        if let Some(hook) = self.hooks.slot_unbound.clone() {
            return hook(self, instance, class, slot, accessor);
        }
        Err(ObjectError::UnboundSlot {
            class: self.class_name(class),
            slot: self.symbols.name(slot).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClassOptions, SlotDeclaration, TypeSpec};

    fn system_with_point() -> (ObjectSystem, ClassId) {
        let mut system = ObjectSystem::new();
        let point = system.intern("point");
        let x = system.intern("x");
        let y = system.intern("y");
        let ix = system.intern(":x");
        let integer = system.intern("integer");
        let class = system
            .define_class(
                point,
                &[],
                vec![
                    SlotDeclaration::new(x)
                        .initarg(ix)
                        .default(Value::Integer(0))
                        .ty(TypeSpec::Predicate(integer)),
                    SlotDeclaration::new(y),
                ],
                ClassOptions::default(),
            )
            .unwrap();
        (system, class)
    }

    #[test]
    fn test_fresh_instance_has_evaluated_defaults() {
        let (mut system, class) = system_with_point();
        let x = system.intern("x");
        let instance = system.make_instance(class, &[]).unwrap();
        assert_eq!(system.get(instance, x), Ok(Value::Integer(0)));
    }

    #[test]
    fn test_set_get_round_trip() {
        let (mut system, class) = system_with_point();
        let x = system.intern("x");
        let instance = system.make_instance(class, &[]).unwrap();
        system.set(instance, x, Value::Integer(42)).unwrap();
        assert_eq!(system.get(instance, x), Ok(Value::Integer(42)));
    }

    #[test]
    fn test_unbound_slot_read_fails() {
        let (mut system, class) = system_with_point();
        let y = system.intern("y");
        let instance = system.make_instance(class, &[]).unwrap();
        assert!(matches!(
            system.get(instance, y),
            Err(ObjectError::UnboundSlot { .. })
        ));
        // Disabling type checking turns the read into the raw marker.
        system.set_type_checking(false);
        assert_eq!(system.get(instance, y), Ok(Value::Unbound));
    }

    #[test]
    fn test_type_validation() {
        let (mut system, class) = system_with_point();
        let x = system.intern("x");
        let instance = system.make_instance(class, &[]).unwrap();
        assert!(matches!(
            system.set(instance, x, Value::Str("seven".into())),
            Err(ObjectError::InvalidSlotType { .. })
        ));
        // The unbound marker always bypasses validation.
        system.slot_make_unbound(instance, x).unwrap();
        assert_eq!(system.slot_bound_p(instance, x), Ok(false));
        // With checking disabled the mismatch is accepted.
        system.set_type_checking(false);
        system.set(instance, x, Value::Str("seven".into())).unwrap();
    }

    #[test]
    fn test_initarg_resolution() {
        let (mut system, class) = system_with_point();
        let x = system.intern("x");
        let ix = system.intern(":x");
        let instance = system.make_instance(class, &[(ix, Value::Integer(9))]).unwrap();
        assert_eq!(system.get(instance, x), Ok(Value::Integer(9)));
        // get falls back to the initarg name when the slot name misses.
        assert_eq!(system.get(instance, ix), Ok(Value::Integer(9)));
    }

    #[test]
    fn test_unknown_initarg_is_invalid_without_hook() {
        let (mut system, class) = system_with_point();
        let bogus = system.intern(":bogus");
        assert!(matches!(
            system.make_instance(class, &[(bogus, Value::Nil)]),
            Err(ObjectError::InvalidSlotName { .. })
        ));
    }

    #[test]
    fn test_class_allocated_slot_is_shared() {
        let mut system = ObjectSystem::new();
        let counterish = system.intern("shared");
        let count = system.intern("count");
        let class = system
            .define_class(
                counterish,
                &[],
                vec![SlotDeclaration::new(count)
                    .default(Value::Integer(0))
                    .allocation(SlotAllocation::Class)],
                ClassOptions::default(),
            )
            .unwrap();
        let a = system.make_instance(class, &[]).unwrap();
        let b = system.make_instance(class, &[]).unwrap();
        system.set(a, count, Value::Integer(5)).unwrap();
        assert_eq!(system.get(b, count), Ok(Value::Integer(5)));
        assert_eq!(system.get_class_slot(class, count), Ok(Value::Integer(5)));
    }

    #[test]
    fn test_set_class_slot_updates_stored_default() {
        let (mut system, class) = system_with_point();
        let x = system.intern("x");
        system.set_class_slot(class, x, Value::Integer(100)).unwrap();
        assert_eq!(system.get_class_slot(class, x), Ok(Value::Integer(100)));
        let instance = system.make_instance(class, &[]).unwrap();
        assert_eq!(system.get(instance, x), Ok(Value::Integer(100)));
    }

    #[test]
    fn test_reset_to_defaults() {
        let (mut system, class) = system_with_point();
        let x = system.intern("x");
        let y = system.intern("y");
        let instance = system.make_instance(class, &[]).unwrap();
        system.set(instance, x, Value::Integer(77)).unwrap();
        system.set(instance, y, Value::Integer(88)).unwrap();
        system.reset_to_defaults(instance, false).unwrap();
        assert_eq!(system.get(instance, x), Ok(Value::Integer(0)));
        // y has no default; an unbound default is written back as-is.
        assert_eq!(system.slot_bound_p(instance, y), Ok(false));
    }

    #[test]
    fn test_private_slot_is_missing_outside_methods() {
        let mut system = ObjectSystem::new();
        let vault = system.intern("vault");
        let secret = system.intern("secret");
        let class = system
            .define_class(
                vault,
                &[],
                vec![SlotDeclaration::new(secret)
                    .default(Value::Integer(1))
                    .protection(SlotProtection::Private)],
                ClassOptions::default(),
            )
            .unwrap();
        let instance = system.make_instance(class, &[]).unwrap();
        assert!(matches!(
            system.get(instance, secret),
            Err(ObjectError::InvalidSlotName { .. })
        ));
    }

    #[test]
    fn test_slot_missing_hook_substitutes() {
        let (mut system, class) = system_with_point();
        let nope = system.intern("nope");
        system.hooks_mut().slot_missing = Some(std::rc::Rc::new(|_, _, _, access, _| {
            match access {
                SlotAccess::Read => Ok(Value::Integer(-1)),
                SlotAccess::Write => Ok(Value::Nil),
            }
        }));
        let instance = system.make_instance(class, &[]).unwrap();
        assert_eq!(system.get(instance, nope), Ok(Value::Integer(-1)));
        // Writes to unknown slots are silently accepted by the hook.
        system.set(instance, nope, Value::Integer(3)).unwrap();
    }

    #[test]
    fn test_slot_unbound_hook_substitutes() {
        let (mut system, class) = system_with_point();
        let y = system.intern("y");
        system.hooks_mut().slot_unbound = Some(std::rc::Rc::new(|_, _, _, _, accessor| {
            assert_eq!(accessor, "get");
            Ok(Value::Integer(0))
        }));
        let instance = system.make_instance(class, &[]).unwrap();
        assert_eq!(system.get(instance, y), Ok(Value::Integer(0)));
    }

    #[test]
    fn test_abstract_class_cannot_be_instantiated() {
        let mut system = ObjectSystem::new();
        let shape = system.intern("shape");
        let class = system
            .define_class(
                shape,
                &[],
                Vec::new(),
                ClassOptions {
                    abstract_class: true,
                    ..ClassOptions::default()
                },
            )
            .unwrap();
        assert!(matches!(
            system.make_instance(class, &[]),
            Err(ObjectError::AbstractClass(_))
        ));
    }
}
