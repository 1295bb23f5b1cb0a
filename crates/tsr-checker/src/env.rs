//! The compile-time lexical environment.
//!
//! A singly-linked scope chain. Each scope owns two tables: value bindings
//! (variables, functions, classes-as-constructors, enum objects, namespaces)
//! and type bindings (aliases, interfaces, instance types, type parameters).
//! Lookups walk the chain; definitions always land in the innermost scope.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::types::TypeRef;

#[derive(Debug, Default)]
struct Scope {
    values: FxHashMap<String, ValueBinding>,
    types: FxHashMap<String, TypeRef>,
    parent: Option<Rc<RefCell<Scope>>>,
}

/// A value binding with its mutability.
#[derive(Clone, Debug)]
pub struct ValueBinding {
    pub ty: TypeRef,
    pub is_const: bool,
}

/// Lexical scope chain for compile-time bindings.
#[derive(Clone, Debug)]
pub struct TypeEnv {
    current: Rc<RefCell<Scope>>,
}

impl Default for TypeEnv {
    fn default() -> Self {
        TypeEnv::new()
    }
}

impl TypeEnv {
    pub fn new() -> Self {
        TypeEnv {
            current: Rc::new(RefCell::new(Scope::default())),
        }
    }

    /// A child environment whose parent is `self`.
    pub fn child(&self) -> TypeEnv {
        TypeEnv {
            current: Rc::new(RefCell::new(Scope {
                values: FxHashMap::default(),
                types: FxHashMap::default(),
                parent: Some(Rc::clone(&self.current)),
            })),
        }
    }

    pub fn define_value(&self, name: &str, ty: TypeRef, is_const: bool) {
        self.current
            .borrow_mut()
            .values
            .insert(name.to_string(), ValueBinding { ty, is_const });
    }

    pub fn define_type(&self, name: &str, ty: TypeRef) {
        self.current.borrow_mut().types.insert(name.to_string(), ty);
    }

    pub fn lookup_value(&self, name: &str) -> Option<ValueBinding> {
        let mut scope = Some(Rc::clone(&self.current));
        while let Some(s) = scope {
            if let Some(binding) = s.borrow().values.get(name) {
                return Some(binding.clone());
            }
            scope = s.borrow().parent.clone();
        }
        None
    }

    pub fn lookup_type(&self, name: &str) -> Option<TypeRef> {
        let mut scope = Some(Rc::clone(&self.current));
        while let Some(s) = scope {
            if let Some(ty) = s.borrow().types.get(name) {
                return Some(ty.clone());
            }
            scope = s.borrow().parent.clone();
        }
        None
    }

    /// Whether `name` is defined in the innermost scope (for duplicate
    /// declaration checks).
    pub fn declared_locally(&self, name: &str) -> bool {
        self.current.borrow().values.contains_key(name)
    }

    pub fn type_declared_locally(&self, name: &str) -> bool {
        self.current.borrow().types.contains_key(name)
    }

    /// Re-bind an existing value at its declaring scope (assignment-style
    /// update used when narrowing invalidation widens a binding back).
    pub fn assign_value(&self, name: &str, ty: TypeRef) -> bool {
        let mut scope = Some(Rc::clone(&self.current));
        while let Some(s) = scope {
            let mut borrow = s.borrow_mut();
            if let Some(binding) = borrow.values.get_mut(name) {
                binding.ty = ty;
                return true;
            }
            drop(borrow);
            scope = s.borrow().parent.clone();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn child_sees_parent_bindings() {
        let env = TypeEnv::new();
        env.define_value("x", Type::number(), false);
        let child = env.child();
        assert!(child.lookup_value("x").is_some());
        assert!(!child.declared_locally("x"));
    }

    #[test]
    fn inner_definition_shadows_outer() {
        let env = TypeEnv::new();
        env.define_value("x", Type::number(), false);
        let child = env.child();
        child.define_value("x", Type::string(), false);
        let binding = child.lookup_value("x").unwrap();
        assert!(matches!(binding.ty.as_ref(), Type::String));
        let outer = env.lookup_value("x").unwrap();
        assert!(matches!(outer.ty.as_ref(), Type::Number));
    }
}
