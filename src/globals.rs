//! Global variable registry: declaration order and constant initializers.
//!
//! The symbols themselves live in the global scope of the shared
//! [`ScopeArena`](crate::symbols::ScopeArena) so function bodies resolve
//! them through the ordinary chained lookup; this manager only remembers the
//! emission order and the initializer texts.

use std::collections::HashMap;
use std::fmt;

use crate::symbols::{Redeclaration, ScopeArena, ScopeId};
use crate::types::VarType;

/// Raised when an initializer targets a name that was never declared.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UnknownGlobal(pub String);

impl fmt::Display for UnknownGlobal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "variable '{}' not declared", self.0)
    }
}

pub struct Globals {
    order: Vec<String>,
    values: HashMap<String, String>,
}

impl Default for Globals {
    fn default() -> Globals {
        Globals::new()
    }
}

impl Globals {
    pub fn new() -> Globals {
        Globals {
            order: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Declares a global in the given scope and records its emission slot.
    pub fn declare(
        &mut self,
        scopes: &mut ScopeArena,
        scope: ScopeId,
        name: &str,
        ty: VarType,
    ) -> Result<(), Redeclaration> {
        scopes.add_global(scope, name, ty)?;
        self.order.push(name.to_string());
        Ok(())
    }

    /// Attaches a constant initializer to an already declared global.
    pub fn set_value(
        &mut self,
        scopes: &ScopeArena,
        scope: ScopeId,
        name: &str,
        value: String,
    ) -> Result<(), UnknownGlobal> {
        if scopes.find_in_scope(scope, name).is_none() {
            return Err(UnknownGlobal(name.to_string()));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Declared names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn declaration_order_is_preserved() {
        let mut scopes = ScopeArena::new();
        let scope = scopes.push(None);
        let mut globals = Globals::new();
        globals.declare(&mut scopes, scope, "b", VarType::Int).unwrap();
        globals.declare(&mut scopes, scope, "a", VarType::Int).unwrap();
        assert_eq!(globals.names(), ["b", "a"]);
    }

    #[test]
    fn initializer_requires_a_declaration() {
        let mut scopes = ScopeArena::new();
        let scope = scopes.push(None);
        let mut globals = Globals::new();
        globals.declare(&mut scopes, scope, "g", VarType::Int).unwrap();

        assert!(globals
            .set_value(&scopes, scope, "g", "7".to_string())
            .is_ok());
        assert_eq!(
            globals.set_value(&scopes, scope, "h", "1".to_string()),
            Err(UnknownGlobal("h".to_string()))
        );
        assert_eq!(globals.value("g"), Some("7"));
        assert_eq!(globals.value("h"), None);
    }
}
