use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::JsValue;

pub type ScopeRef = Rc<Scope>;

#[derive(Clone, Debug)]
struct Slot {
    value: JsValue,
    mutable: bool,
}

/// Why an assignment to a name was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignError {
    Constant,
    Undeclared,
}

/// One lexical frame. Function frames also carry the `this` value; arrow
/// functions and blocks inherit it from their parent.
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Slot>>,
    parent: Option<ScopeRef>,
    this: Option<JsValue>,
}

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(Scope::default())
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(Scope {
            parent: Some(parent.clone()),
            ..Scope::default()
        })
    }

    pub fn function(parent: &ScopeRef, this: JsValue) -> ScopeRef {
        Rc::new(Scope {
            parent: Some(parent.clone()),
            this: Some(this),
            ..Scope::default()
        })
    }

    /// Bind `name` in this frame, replacing an existing binding of the same name.
    pub fn declare(&self, name: &str, value: JsValue, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Slot { value, mutable });
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<JsValue> {
        if let Some(slot) = self.vars.borrow().get(name) {
            return Some(slot.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn assign(&self, name: &str, value: JsValue) -> Result<(), AssignError> {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            if !slot.mutable {
                return Err(AssignError::Constant);
            }
            slot.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(p) => p.assign(name, value),
            None => Err(AssignError::Undeclared),
        }
    }

    pub fn this_value(&self) -> JsValue {
        match (&self.this, &self.parent) {
            (Some(this), _) => this.clone(),
            (None, Some(p)) => p.this_value(),
            (None, None) => JsValue::Undefined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn inner_frames_shadow_outer_ones() {
        let root = Scope::root();
        root.declare("x", JsValue::Number(1.0), false);
        let inner = Scope::child(&root);
        inner.declare("x", JsValue::Number(2.0), true);
        assert_eq!(inner.lookup("x").unwrap().to_number(), 2.0);
        assert_eq!(root.lookup("x").unwrap().to_number(), 1.0);
    }

    #[test]
    fn assignment_respects_constness() {
        let root = Scope::root();
        root.declare("k", JsValue::Null, false);
        let inner = Scope::child(&root);
        assert_eq!(inner.assign("k", JsValue::Null), Err(AssignError::Constant));
        assert_eq!(inner.assign("nope", JsValue::Null), Err(AssignError::Undeclared));
    }

    #[test]
    fn this_is_inherited_by_blocks() {
        let root = Scope::root();
        let f = Scope::function(&root, JsValue::string("me"));
        let block = Scope::child(&f);
        assert_eq!(block.this_value().to_display_string(), "me");
        assert!(matches!(root.this_value(), JsValue::Undefined));
    }
}
