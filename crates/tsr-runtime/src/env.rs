//! The runtime lexical environment.
//!
//! A singly-linked scope chain of reference-counted scopes. Blocks and calls
//! push children; closures capture their defining scope by handle. Lookups
//! walk the chain; assignment stops at the first scope containing the name;
//! definition always lands in the innermost scope.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::value::Value;

#[derive(Debug, Default)]
struct Scope {
    bindings: FxHashMap<String, Value>,
    parent: Option<Rc<RefCell<Scope>>>,
}

#[derive(Clone, Debug)]
pub struct RuntimeEnv {
    current: Rc<RefCell<Scope>>,
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        RuntimeEnv::new()
    }
}

impl RuntimeEnv {
    pub fn new() -> Self {
        RuntimeEnv {
            current: Rc::new(RefCell::new(Scope::default())),
        }
    }

    pub fn child(&self) -> RuntimeEnv {
        RuntimeEnv {
            current: Rc::new(RefCell::new(Scope {
                bindings: FxHashMap::default(),
                parent: Some(Rc::clone(&self.current)),
            })),
        }
    }

    /// Define in the innermost scope, shadowing any outer binding.
    pub fn define(&self, name: &str, value: Value) {
        self.current
            .borrow_mut()
            .bindings
            .insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = Some(Rc::clone(&self.current));
        while let Some(s) = scope {
            if let Some(v) = s.borrow().bindings.get(name) {
                return Some(v.clone());
            }
            scope = s.borrow().parent.clone();
        }
        None
    }

    /// Assign to the nearest enclosing scope that has the name. Returns
    /// false when no scope defines it.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut scope = Some(Rc::clone(&self.current));
        while let Some(s) = scope {
            {
                let mut borrow = s.borrow_mut();
                if let Some(slot) = borrow.bindings.get_mut(name) {
                    *slot = value;
                    return true;
                }
            }
            scope = s.borrow().parent.clone();
        }
        false
    }

    pub fn has(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_stops_at_first_enclosing_scope() {
        let outer = RuntimeEnv::new();
        outer.define("x", Value::Number(1.0));
        let inner = outer.child();
        assert!(inner.assign("x", Value::Number(2.0)));
        assert_eq!(outer.lookup("x").unwrap().as_number(), Some(2.0));
    }

    #[test]
    fn define_shadows_in_inner_scope() {
        let outer = RuntimeEnv::new();
        outer.define("x", Value::Number(1.0));
        let inner = outer.child();
        inner.define("x", Value::Number(9.0));
        assert_eq!(inner.lookup("x").unwrap().as_number(), Some(9.0));
        assert_eq!(outer.lookup("x").unwrap().as_number(), Some(1.0));
    }

    #[test]
    fn closures_capture_by_handle() {
        let outer = RuntimeEnv::new();
        outer.define("count", Value::Number(0.0));
        let captured = outer.clone();
        captured.assign("count", Value::Number(5.0));
        assert_eq!(outer.lookup("count").unwrap().as_number(), Some(5.0));
    }
}
