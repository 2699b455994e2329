// Eidos Class Registry
//
// One record per class: identity, parent/child links, merged slot schema,
// per-class storage, and the precomputed default-instance template. Classes
// are immutable after finalization; redefinition replaces the schema and
// derived data but preserves the parent/child graph where possible.

use crate::error::ObjectError;
use crate::mro::{self, MroPolicy};
use crate::symbol::SymbolId;
use crate::system::ObjectSystem;
use crate::value::Value;
use std::collections::HashMap;
use tracing::debug;

/// Unique identifier for a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotProtection {
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAllocation {
    /// One storage cell per instance.
    Instance,
    /// One storage cell on the class, shared by all instances.
    Class,
}

/// A slot's default. Deferred expressions are handed to the registered
/// default-evaluator hook at template-build or reset time, never at
/// declaration time.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotDefault {
    /// The slot starts unbound.
    Unbound,
    Literal(Value),
    Deferred(Value),
}

/// Declared type constraint for a slot, checked at assignment time.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    /// Accept anything.
    Any,
    /// A predicate registered on the system under this name. An
    /// unregistered name accepts anything.
    Predicate(SymbolId),
    /// Value must be an instance of the named class or a subclass.
    InstanceOf(SymbolId),
}

/// A slot as written in a class definition.
#[derive(Debug, Clone)]
pub struct SlotDeclaration {
    pub name: SymbolId,
    pub initarg: Option<SymbolId>,
    pub default: SlotDefault,
    pub ty: TypeSpec,
    pub protection: SlotProtection,
    /// None inherits the origin's allocation on an override, and means
    /// per-instance for a newly introduced slot.
    pub allocation: Option<SlotAllocation>,
}

impl SlotDeclaration {
    pub fn new(name: SymbolId) -> Self {
        Self {
            name,
            initarg: None,
            default: SlotDefault::Unbound,
            ty: TypeSpec::Any,
            protection: SlotProtection::Public,
            allocation: None,
        }
    }

    pub fn initarg(mut self, initarg: SymbolId) -> Self {
        self.initarg = Some(initarg);
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = SlotDefault::Literal(value);
        self
    }

    pub fn default_deferred(mut self, expr: Value) -> Self {
        self.default = SlotDefault::Deferred(expr);
        self
    }

    pub fn ty(mut self, ty: TypeSpec) -> Self {
        self.ty = ty;
        self
    }

    pub fn protection(mut self, protection: SlotProtection) -> Self {
        self.protection = protection;
        self
    }

    pub fn allocation(mut self, allocation: SlotAllocation) -> Self {
        self.allocation = Some(allocation);
        self
    }
}

/// An effective slot after inheritance merging.
#[derive(Debug, Clone)]
pub struct SlotSchema {
    pub name: SymbolId,
    pub initarg: Option<SymbolId>,
    pub default: SlotDefault,
    pub ty: TypeSpec,
    pub protection: SlotProtection,
    pub allocation: SlotAllocation,
    /// The class that first introduced this slot. Fixed across inheritance;
    /// protection checks compare against it.
    pub origin: ClassId,
    /// Position in the instance storage vector (per-instance slots) or the
    /// class storage vector (per-class slots).
    pub index: usize,
}

/// Class definition options. The `custom` bag is opaque to the core.
#[derive(Debug, Clone, Default)]
pub struct ClassOptions {
    pub abstract_class: bool,
    pub method_invocation_order: MroPolicy,
    pub docstring: Option<String>,
    pub custom: Vec<(SymbolId, Value)>,
}

/// A class definition
#[derive(Debug, Clone)]
pub struct Class {
    /// Class name
    pub name: SymbolId,
    /// Direct parents, in declaration order
    pub parents: Vec<ClassId>,
    /// Direct children (back-references, not owning)
    pub children: Vec<ClassId>,
    /// Direct slot declarations, as written
    pub direct_slots: Vec<SlotDeclaration>,
    /// Effective slots, merged from all parents (computed)
    pub slots: Vec<SlotSchema>,
    /// Slot name -> position in `slots`
    pub slot_index: HashMap<SymbolId, usize>,
    /// Initarg name -> position in `slots`
    pub initarg_index: HashMap<SymbolId, usize>,
    /// Storage for per-class slots, shared by all instances
    pub class_values: Vec<Value>,
    /// Default-instance template: per-instance slots set to their evaluated
    /// defaults (rebuilt whenever the schema changes)
    pub template: Vec<Value>,
    /// Number of per-instance slots
    pub instance_size: usize,
    /// Linearization policy, fixed at finalization
    pub mro: MroPolicy,
    /// Class precedence list (computed, cached)
    pub cpl: Vec<ClassId>,
    /// Definition options
    pub options: ClassOptions,
}

impl Class {
    /// Resolve a slot name to its schema position, falling back to a
    /// reverse lookup by initarg name.
    pub fn resolve_slot(&self, name: SymbolId) -> Option<usize> {
        self.slot_index
            .get(&name)
            .or_else(|| self.initarg_index.get(&name))
            .copied()
    }
}

impl ObjectSystem {
    /// Define (or redefine) a class. Parents must already be registered.
    /// Slot schemas are merged from the parents in declaration order, with
    /// child-local declarations overriding defaults and initargs but never
    /// changing an inherited slot's type or protection.
    pub fn define_class(
        &mut self,
        name: SymbolId,
        parents: &[SymbolId],
        slots: Vec<SlotDeclaration>,
        options: ClassOptions,
    ) -> Result<ClassId, ObjectError> {
        let mut parent_ids = Vec::with_capacity(parents.len());
        for &pname in parents {
            match self.class_names.get(&pname) {
                Some(&pid) => parent_ids.push(pid),
                None => {
                    return Err(ObjectError::UnknownParent(
                        self.symbols.name(pname).to_string(),
                    ))
                }
            }
        }
        if parent_ids.is_empty() {
            parent_ids.push(self.root_class);
        }

        let existing = self.class_names.get(&name).copied();
        let id = existing.unwrap_or(ClassId(self.classes.len() as u32));

        // A redefinition must not introduce a parent that descends from the
        // class being redefined.
        if let Some(eid) = existing {
            for &pid in &parent_ids {
                if pid == eid || self.classes[pid.0 as usize].cpl.contains(&eid) {
                    return Err(ObjectError::InconsistentHierarchy(
                        self.symbols.name(name).to_string(),
                    ));
                }
            }
        }

        let policy = options.method_invocation_order;
        let cpl = mro::linearize(&self.classes, id, &parent_ids, policy).map_err(|_| {
            ObjectError::InconsistentHierarchy(self.symbols.name(name).to_string())
        })?;

        let mut schema = self.build_schema(id, &parent_ids, &slots)?;
        let (slot_index, initarg_index, instance_size, class_size) = index_schema(&mut schema);
        let class_values = self.build_class_values(&schema, class_size);
        let template = self.build_template(&schema, instance_size);

        let old_parents = existing
            .map(|eid| self.classes[eid.0 as usize].parents.clone())
            .unwrap_or_default();

        let class = Class {
            name,
            parents: parent_ids.clone(),
            children: existing
                .map(|eid| self.classes[eid.0 as usize].children.clone())
                .unwrap_or_default(),
            direct_slots: slots,
            slots: schema,
            slot_index,
            initarg_index,
            class_values,
            template,
            instance_size,
            mro: policy,
            cpl,
            options,
        };

        if let Some(eid) = existing {
            self.classes[eid.0 as usize] = class;
        } else {
            self.classes.push(class);
            self.class_names.insert(name, id);
        }

        // Maintain child back-references on the parents.
        for old in &old_parents {
            if !parent_ids.contains(old) {
                self.classes[old.0 as usize].children.retain(|c| *c != id);
            }
        }
        for &pid in &parent_ids {
            let parent = &mut self.classes[pid.0 as usize];
            if !parent.children.contains(&id) {
                parent.children.push(id);
            }
        }

        debug!(
            class = self.symbols.name(name),
            redefined = existing.is_some(),
            "class finalized"
        );

        if existing.is_some() {
            self.rebuild_descendants(id)?;
        }

        // Method resolution depends on precedence lists, so every generic
        // function's dispatch cache goes stale at once.
        self.invalidate_all_dispatch_caches();

        Ok(id)
    }

    /// Find a class by name.
    pub fn lookup_class(&self, name: SymbolId) -> Option<ClassId> {
        self.class_names.get(&name).copied()
    }

    /// Get a class by id.
    pub fn get_class(&self, id: ClassId) -> Option<&Class> {
        self.classes.get(id.0 as usize)
    }

    /// The cached precedence list of a class: the class itself first, the
    /// root class last.
    pub fn class_precedence_list(&self, id: ClassId) -> Option<&[ClassId]> {
        self.classes.get(id.0 as usize).map(|c| c.cpl.as_slice())
    }

    /// True when `class` is `ancestor` or a descendant of it.
    pub fn class_is_a(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.classes
            .get(class.0 as usize)
            .map(|c| c.cpl.contains(&ancestor))
            .unwrap_or(false)
    }

    pub(crate) fn class_name(&self, id: ClassId) -> String {
        self.classes
            .get(id.0 as usize)
            .map(|c| self.symbols.name(c.name).to_string())
            .unwrap_or_else(|| format!("#<class {}>", id.0))
    }

    /// Evaluate a slot default into a concrete value. Deferred expressions
    /// go through the registered evaluator hook; without one the stored
    /// expression stands in for the result.
    pub(crate) fn evaluate_default(&self, default: &SlotDefault) -> Value {
        match default {
            SlotDefault::Unbound => Value::Unbound,
            SlotDefault::Literal(v) => v.clone(),
            SlotDefault::Deferred(expr) => match &self.hooks.default_evaluator {
                Some(eval) => eval(expr),
                None => expr.clone(),
            },
        }
    }

    /// Merge the effective slots of `parents` (declaration order, first
    /// occurrence kept) with the class's own declarations.
    fn build_schema(
        &self,
        id: ClassId,
        parents: &[ClassId],
        direct: &[SlotDeclaration],
    ) -> Result<Vec<SlotSchema>, ObjectError> {
        let mut schema: Vec<SlotSchema> = Vec::new();

        for &pid in parents {
            let parent = &self.classes[pid.0 as usize];
            for slot in &parent.slots {
                match schema.iter().position(|s| s.name == slot.name) {
                    None => schema.push(slot.clone()),
                    Some(pos) => {
                        let kept = &schema[pos];
                        if kept.ty != slot.ty {
                            return Err(self.slot_conflict(
                                slot.name,
                                "type mismatch between inherited slots",
                            ));
                        }
                        if kept.protection != slot.protection {
                            return Err(self.slot_conflict(
                                slot.name,
                                "protection mismatch between inherited slots",
                            ));
                        }
                    }
                }
            }
        }

        for decl in direct {
            match schema.iter().position(|s| s.name == decl.name) {
                Some(pos) => {
                    // Override of an inherited slot: the default and initarg
                    // are replaced, type and protection must not change.
                    let inherited = &mut schema[pos];
                    if decl.ty != TypeSpec::Any && decl.ty != inherited.ty {
                        return Err(self.slot_conflict(
                            decl.name,
                            "type mismatch between child and inherited slot",
                        ));
                    }
                    if decl.protection != inherited.protection {
                        return Err(self.slot_conflict(
                            decl.name,
                            "protection mismatch between child and inherited slot",
                        ));
                    }
                    inherited.default = decl.default.clone();
                    if decl.initarg.is_some() {
                        inherited.initarg = decl.initarg;
                    }
                }
                None => schema.push(SlotSchema {
                    name: decl.name,
                    initarg: decl.initarg,
                    default: decl.default.clone(),
                    ty: decl.ty.clone(),
                    protection: decl.protection,
                    allocation: decl.allocation.unwrap_or(SlotAllocation::Instance),
                    origin: id,
                    index: 0,
                }),
            }
        }

        Ok(schema)
    }

    fn slot_conflict(&self, slot: SymbolId, reason: &str) -> ObjectError {
        ObjectError::DuplicateSlotConflict {
            slot: self.symbols.name(slot).to_string(),
            reason: reason.to_string(),
        }
    }

    fn build_class_values(&self, schema: &[SlotSchema], class_size: usize) -> Vec<Value> {
        let mut values = vec![Value::Unbound; class_size];
        for slot in schema {
            if slot.allocation == SlotAllocation::Class {
                values[slot.index] = self.evaluate_default(&slot.default);
            }
        }
        values
    }

    fn build_template(&self, schema: &[SlotSchema], instance_size: usize) -> Vec<Value> {
        let mut template = vec![Value::Unbound; instance_size];
        for slot in schema {
            if slot.allocation == SlotAllocation::Instance {
                template[slot.index] = self.evaluate_default(&slot.default);
            }
        }
        template
    }

    /// Recompute the derived data (precedence list, schema, storage,
    /// template) of every descendant of a redefined class, parents before
    /// children.
    fn rebuild_descendants(&mut self, id: ClassId) -> Result<(), ObjectError> {
        let mut order: Vec<ClassId> = Vec::new();
        let mut queue: Vec<ClassId> = self.classes[id.0 as usize].children.clone();
        while let Some(next) = queue.pop() {
            if !order.contains(&next) {
                order.push(next);
                queue.extend(self.classes[next.0 as usize].children.iter().copied());
            }
        }
        order.sort_by_key(|c| self.classes[c.0 as usize].cpl.len());

        for cid in order {
            let (name, parents, direct, policy) = {
                let class = &self.classes[cid.0 as usize];
                (
                    class.name,
                    class.parents.clone(),
                    class.direct_slots.clone(),
                    class.mro,
                )
            };
            let cpl = mro::linearize(&self.classes, cid, &parents, policy).map_err(|_| {
                ObjectError::InconsistentHierarchy(self.symbols.name(name).to_string())
            })?;
            let mut schema = self.build_schema(cid, &parents, &direct)?;
            let (slot_index, initarg_index, instance_size, class_size) = index_schema(&mut schema);
            let class_values = self.build_class_values(&schema, class_size);
            let template = self.build_template(&schema, instance_size);

            let class = &mut self.classes[cid.0 as usize];
            class.cpl = cpl;
            class.slots = schema;
            class.slot_index = slot_index;
            class.initarg_index = initarg_index;
            class.class_values = class_values;
            class.template = template;
            class.instance_size = instance_size;
        }
        Ok(())
    }
}

/// Assign storage positions and build the name/initarg lookup tables.
/// Returns (slot_index, initarg_index, instance_size, class_size).
fn index_schema(
    schema: &mut [SlotSchema],
) -> (
    HashMap<SymbolId, usize>,
    HashMap<SymbolId, usize>,
    usize,
    usize,
) {
    let mut slot_index = HashMap::new();
    let mut initarg_index = HashMap::new();
    let mut instance_size = 0;
    let mut class_size = 0;
    for (pos, slot) in schema.iter_mut().enumerate() {
        match slot.allocation {
            SlotAllocation::Instance => {
                slot.index = instance_size;
                instance_size += 1;
            }
            SlotAllocation::Class => {
                slot.index = class_size;
                class_size += 1;
            }
        }
        slot_index.insert(slot.name, pos);
        if let Some(initarg) = slot.initarg {
            initarg_index.insert(initarg, pos);
        }
    }
    (slot_index, initarg_index, instance_size, class_size)
}
