use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::value::Value;

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// A lexical scope. Function calls create a child scope whose chain ends at
/// the script's module globals; the module itself executes directly in the
/// root scope, so top-level bindings persist across invocations.
#[derive(Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    /// Binds a name in this scope, shadowing any outer binding.
    pub fn define(&mut self, name: String, value: Value) {
        self.bindings.insert(name, value);
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).cloned()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    /// Resolves a name through the scope chain.
    pub fn get(env: &EnvironmentRef, name: &str) -> Option<Value> {
        if let Some(value) = env.borrow().bindings.get(name) {
            return Some(value.clone());
        }
        let parent = env.borrow().parent.clone();
        parent.as_ref().and_then(|p| Environment::get(p, name))
    }

    /// Rebinds a name in the scope where it is currently bound. Returns
    /// false when the name is bound nowhere in the chain.
    pub fn update(env: &EnvironmentRef, name: &str, value: Value) -> bool {
        if env.borrow().bindings.contains_key(name) {
            env.borrow_mut().bindings.insert(name.to_string(), value);
            return true;
        }
        let parent = env.borrow().parent.clone();
        match parent {
            Some(p) => Environment::update(&p, name, value),
            None => false,
        }
    }
}
