// Eidos Generic Function Dispatch
//
// Each generic function keeps a method tree keyed by qualifier and
// specializing class, a lazily filled dispatch cache keyed by (qualifier,
// dispatching class), and a derived single-primary fast path. A call runs
// before methods, exactly one primary with an explicit next-method chain,
// then after methods; static methods dispatch on class-valued arguments and
// never combine with the other qualifiers.

use crate::error::ObjectError;
use crate::registry::ClassId;
use crate::slots::InstanceId;
use crate::symbol::SymbolId;
use crate::system::ObjectSystem;
use crate::value::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

/// Unique identifier for a generic function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericId(pub u32);

/// The role of a method implementation within a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// Dispatched on class-valued first arguments; never combines with the
    /// other qualifiers.
    Static,
    Before,
    Primary,
    After,
}

type MethodFn = dyn Fn(&mut ObjectSystem, &[Value]) -> Result<Value, ObjectError>;

/// A callable method implementation.
#[derive(Clone)]
pub struct MethodBody(Rc<MethodFn>);

impl MethodBody {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&mut ObjectSystem, &[Value]) -> Result<Value, ObjectError> + 'static,
    {
        Self(Rc::new(body))
    }

    fn call(&self, system: &mut ObjectSystem, args: &[Value]) -> Result<Value, ObjectError> {
        (self.0)(system, args)
    }
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<method>")
    }
}

/// One resolved implementation: the body plus the class that owns it (None
/// for an unspecialized implementation).
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub owner: Option<ClassId>,
    pub body: MethodBody,
}

/// An ordered group of applicable implementations, most specific first.
pub type MethodGroup = SmallVec<[ResolvedMethod; 4]>;

/// Per-qualifier implementation maps. At most one implementation exists per
/// (qualifier, specializing class); the unspecialized variants exist for
/// before/primary/after only.
#[derive(Debug, Clone, Default)]
pub struct MethodTree {
    pub(crate) before: HashMap<ClassId, MethodBody>,
    pub(crate) primary: HashMap<ClassId, MethodBody>,
    pub(crate) after: HashMap<ClassId, MethodBody>,
    pub(crate) statics: HashMap<ClassId, MethodBody>,
    pub(crate) generic_before: Option<MethodBody>,
    pub(crate) generic_primary: Option<MethodBody>,
    pub(crate) generic_after: Option<MethodBody>,
}

impl MethodTree {
    pub fn method_count(&self) -> usize {
        self.before.len()
            + self.primary.len()
            + self.after.len()
            + self.statics.len()
            + self.generic_before.is_some() as usize
            + self.generic_primary.is_some() as usize
            + self.generic_after.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.method_count() == 0
    }
}

/// A named dispatch point.
#[derive(Debug)]
pub struct GenericFunction {
    pub name: SymbolId,
    pub(crate) tree: MethodTree,
    /// (qualifier, dispatching class) -> ordered applicable group. Filled
    /// lazily; cleared wholesale on any method-tree or class change.
    pub(crate) cache: HashMap<(Qualifier, ClassId), MethodGroup>,
    /// Set when the tree holds exactly one implementation and it is a
    /// single primary method; re-derived on every tree change.
    pub(crate) fast_primary: Option<ResolvedMethod>,
}

/// Call-scoped next-method state: the remaining, less-specific applicable
/// primaries (or statics) of the innermost executing method.
#[derive(Debug, Clone)]
pub struct NextFrame {
    pub(crate) generic: SymbolId,
    pub(crate) chain: MethodGroup,
    pub(crate) args: Vec<Value>,
}

impl ObjectSystem {
    /// Get or create the generic function registered under `name`.
    pub fn ensure_generic(&mut self, name: SymbolId) -> GenericId {
        if let Some(&id) = self.generic_names.get(&name) {
            return id;
        }
        let id = GenericId(self.generics.len() as u32);
        self.generics.push(GenericFunction {
            name,
            tree: MethodTree::default(),
            cache: HashMap::new(),
            fast_primary: None,
        });
        self.generic_names.insert(name, id);
        id
    }

    /// Find a generic function by name.
    pub fn lookup_generic(&self, name: SymbolId) -> Option<GenericId> {
        self.generic_names.get(&name).copied()
    }

    /// Get a generic function by id.
    pub fn get_generic(&self, id: GenericId) -> Option<&GenericFunction> {
        self.generics.get(id.0 as usize)
    }

    /// Register a method implementation. Redefining the same (generic,
    /// qualifier, specializer) triple replaces the previous implementation
    /// and clears the generic's dispatch cache.
    pub fn define_method<F>(
        &mut self,
        name: SymbolId,
        qualifier: Qualifier,
        specializer: Option<SymbolId>,
        body: F,
    ) -> Result<GenericId, ObjectError>
    where
        F: Fn(&mut ObjectSystem, &[Value]) -> Result<Value, ObjectError> + 'static,
    {
        let class = match specializer {
            Some(symbol) => Some(self.lookup_class(symbol).ok_or_else(|| {
                ObjectError::UnknownClass(self.symbols.name(symbol).to_string())
            })?),
            None => None,
        };
        if qualifier == Qualifier::Static && class.is_none() {
            return Err(ObjectError::InvalidMethodDefinition {
                generic: self.symbols.name(name).to_string(),
                reason: "static methods require a specializing class".to_string(),
            });
        }

        let id = self.ensure_generic(name);
        let body = MethodBody::new(body);
        let generic = &mut self.generics[id.0 as usize];
        let replaced = match (qualifier, class) {
            (Qualifier::Before, Some(c)) => generic.tree.before.insert(c, body).is_some(),
            (Qualifier::Primary, Some(c)) => generic.tree.primary.insert(c, body).is_some(),
            (Qualifier::After, Some(c)) => generic.tree.after.insert(c, body).is_some(),
            (Qualifier::Static, Some(c)) => generic.tree.statics.insert(c, body).is_some(),
            (Qualifier::Before, None) => {
                generic.tree.generic_before.replace(body).is_some()
            }
            (Qualifier::Primary, None) => {
                generic.tree.generic_primary.replace(body).is_some()
            }
            (Qualifier::After, None) => generic.tree.generic_after.replace(body).is_some(),
            (Qualifier::Static, None) => unreachable!(),
        };
        generic.cache.clear();
        self.derive_fast_primary(id);

        debug!(
            generic = self.symbols.name(name),
            ?qualifier,
            replaced,
            "method defined"
        );
        Ok(id)
    }

    /// Call a generic function. The runtime class of the first argument
    /// selects the applicable methods; class-valued first arguments restrict
    /// dispatch to static methods, and any other non-instance argument
    /// reaches only the unspecialized primary.
    pub fn dispatch(&mut self, name: SymbolId, args: &[Value]) -> Result<Value, ObjectError> {
        let id = self
            .lookup_generic(name)
            .ok_or_else(|| ObjectError::NoMethodDefinition(self.symbols.name(name).to_string()))?;
        if self.generics[id.0 as usize].tree.is_empty() {
            return Err(ObjectError::NoMethodDefinition(
                self.symbols.name(name).to_string(),
            ));
        }

        match args.first() {
            Some(&Value::Instance(instance)) => self.dispatch_instance(id, name, instance, args),
            Some(&Value::Class(class)) => self.dispatch_static(id, name, class, args),
            _ => self.dispatch_unspecialized(id, name, args),
        }
    }

    /// Invoke the next, less-specific applicable method of the innermost
    /// executing primary (or static) method, with the original arguments or
    /// explicit replacements.
    pub fn call_next_method(&mut self, args: Option<Vec<Value>>) -> Result<Value, ObjectError> {
        let frame = match self.next_frames.last() {
            Some(frame) => frame.clone(),
            None => {
                return Err(ObjectError::NoNextMethod(
                    "#<no method executing>".to_string(),
                ))
            }
        };
        if frame.chain.is_empty() {
            return Err(ObjectError::NoNextMethod(
                self.symbols.name(frame.generic).to_string(),
            ));
        }
        let next = frame.chain[0].clone();
        let rest: MethodGroup = frame.chain[1..].iter().cloned().collect();
        let call_args = args.unwrap_or(frame.args);
        self.run_method(frame.generic, &next, rest, &call_args)
    }

    /// True when the innermost executing method has a next method.
    pub fn next_method_p(&self) -> bool {
        self.next_frames
            .last()
            .map(|frame| !frame.chain.is_empty())
            .unwrap_or(false)
    }

    /// Whole-table invalidation: every generic function's dispatch cache is
    /// dropped at once (class definitions move precedence lists underneath
    /// the cached groups).
    pub(crate) fn invalidate_all_dispatch_caches(&mut self) {
        for generic in &mut self.generics {
            generic.cache.clear();
        }
        trace!("dispatch caches invalidated");
    }

    fn dispatch_instance(
        &mut self,
        id: GenericId,
        name: SymbolId,
        instance: InstanceId,
        args: &[Value],
    ) -> Result<Value, ObjectError> {
        let class = match self.instance_class(instance) {
            Some(class) => class,
            None => return self.no_applicable(name, args),
        };

        // Single-primary generics skip group collection entirely: one
        // class-membership check, then a direct call.
        if let Some(fast) = self.generics[id.0 as usize].fast_primary.clone() {
            let applicable = match fast.owner {
                Some(owner) => self.class_is_a(class, owner),
                None => true,
            };
            if !applicable {
                return self.no_applicable(name, args);
            }
            return self.run_method(name, &fast, MethodGroup::new(), args);
        }

        let befores = self.resolve_group(id, Qualifier::Before, class);
        let primaries = self.resolve_group(id, Qualifier::Primary, class);
        let afters = self.resolve_group(id, Qualifier::After, class);

        if befores.is_empty() && primaries.is_empty() && afters.is_empty() {
            return self.no_applicable(name, args);
        }

        for method in &befores {
            self.run_method(name, method, MethodGroup::new(), args)?;
        }

        let value = if primaries.is_empty() {
            Value::Nil
        } else {
            let head = primaries[0].clone();
            let chain: MethodGroup = primaries[1..].iter().cloned().collect();
            self.run_method(name, &head, chain, args)?
        };

        for method in &afters {
            self.run_method(name, method, MethodGroup::new(), args)?;
        }

        Ok(value)
    }

    fn dispatch_static(
        &mut self,
        id: GenericId,
        name: SymbolId,
        class: ClassId,
        args: &[Value],
    ) -> Result<Value, ObjectError> {
        let group = self.resolve_group(id, Qualifier::Static, class);
        if group.is_empty() {
            return self.no_applicable(name, args);
        }
        let head = group[0].clone();
        let chain: MethodGroup = group[1..].iter().cloned().collect();
        self.run_method(name, &head, chain, args)
    }

    fn dispatch_unspecialized(
        &mut self,
        id: GenericId,
        name: SymbolId,
        args: &[Value],
    ) -> Result<Value, ObjectError> {
        match self.generics[id.0 as usize].tree.generic_primary.clone() {
            Some(body) => {
                let method = ResolvedMethod { owner: None, body };
                self.run_method(name, &method, MethodGroup::new(), args)
            }
            None => self.no_applicable(name, args),
        }
    }

    /// Ordered applicable implementations for one qualifier and dispatching
    /// class: every ancestor along the precedence list with an
    /// implementation, most specific first, falling back to the
    /// unspecialized implementation when no class-specialized one applies.
    /// Memoized per (qualifier, class) until the next invalidation.
    fn resolve_group(&mut self, id: GenericId, qualifier: Qualifier, class: ClassId) -> MethodGroup {
        if let Some(cached) = self.generics[id.0 as usize].cache.get(&(qualifier, class)) {
            return cached.clone();
        }

        let cpl: Vec<ClassId> = self
            .class_precedence_list(class)
            .map(|cpl| cpl.to_vec())
            .unwrap_or_default();

        let mut group = MethodGroup::new();
        {
            let tree = &self.generics[id.0 as usize].tree;
            let table = match qualifier {
                Qualifier::Before => &tree.before,
                Qualifier::Primary => &tree.primary,
                Qualifier::After => &tree.after,
                Qualifier::Static => &tree.statics,
            };
            for &ancestor in &cpl {
                if let Some(body) = table.get(&ancestor) {
                    group.push(ResolvedMethod {
                        owner: Some(ancestor),
                        body: body.clone(),
                    });
                }
            }
            if group.is_empty() {
                let fallback = match qualifier {
                    Qualifier::Before => &tree.generic_before,
                    Qualifier::Primary => &tree.generic_primary,
                    Qualifier::After => &tree.generic_after,
                    Qualifier::Static => &None,
                };
                if let Some(body) = fallback {
                    group.push(ResolvedMethod {
                        owner: None,
                        body: body.clone(),
                    });
                }
            }
        }

        self.generics[id.0 as usize]
            .cache
            .insert((qualifier, class), group.clone());
        group
    }

    /// Run one implementation with its scope and next-method frame pushed.
    /// Both stacks are restored on every exit path before the result
    /// propagates.
    fn run_method(
        &mut self,
        generic: SymbolId,
        method: &ResolvedMethod,
        chain: MethodGroup,
        args: &[Value],
    ) -> Result<Value, ObjectError> {
        self.next_frames.push(NextFrame {
            generic,
            chain,
            args: args.to_vec(),
        });
        self.scope_stack.push(method.owner);
        let result = method.body.call(self, args);
        self.scope_stack.pop();
        self.next_frames.pop();
        result
    }

    fn no_applicable(&mut self, name: SymbolId, args: &[Value]) -> Result<Value, ObjectError> {
        let first = args.first().cloned().unwrap_or(Value::Nil);
        if let Some(hook) = self.hooks.no_applicable_method.clone() {
            return hook(self, &first, name, args);
        }
        Err(ObjectError::NoApplicableMethod {
            generic: self.symbols.name(name).to_string(),
            argument: self.describe(&first),
        })
    }

    /// Re-derive the single-primary fast path from the method tree. Must
    /// run on every tree change so the optimization never goes stale.
    fn derive_fast_primary(&mut self, id: GenericId) {
        let generic = &self.generics[id.0 as usize];
        let fast = if generic.tree.method_count() == 1 {
            if let Some((&class, body)) = generic.tree.primary.iter().next() {
                Some(ResolvedMethod {
                    owner: Some(class),
                    body: body.clone(),
                })
            } else {
                generic
                    .tree
                    .generic_primary
                    .as_ref()
                    .map(|body| ResolvedMethod {
                        owner: None,
                        body: body.clone(),
                    })
            }
        } else {
            None
        };
        let changed = fast.is_some() != self.generics[id.0 as usize].fast_primary.is_some();
        self.generics[id.0 as usize].fast_primary = fast;
        if changed {
            trace!(
                generic = self
                    .symbols
                    .name(self.generics[id.0 as usize].name),
                enabled = self.generics[id.0 as usize].fast_primary.is_some(),
                "single-primary fast path re-derived"
            );
        }
    }
}
