//! Lexically scoped symbol tables with stack-slot allocation.
//!
//! Scopes form a strict tree and are kept in a single arena ([`ScopeArena`]);
//! the child-to-parent edge is an index, so no scope ever dangles. A child
//! scope inherits its parent's allocation cursor on entry, and the builder
//! copies the cursor back on exit with [`ScopeArena::synchronize`] so sibling
//! blocks never reuse slots (conservative no-reclamation policy; only
//! expression temporaries are reclaimed, through
//! [`ScopeArena::free_last_temp`]).

use std::collections::HashMap;
use std::fmt;

use crate::types::VarType;
use crate::SLOT_BYTES;

/// Where a symbol's storage lives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StorageClass {
    Global,
    FunctionParams,
    Block,
}

/// One named entity: a variable, parameter or temporary.
///
/// `offset` is the positive displacement below the frame pointer assigned at
/// declaration time; it is meaningless for globals. A symbol carrying a
/// `value` is a constant temporary: its literal lives in the table itself and
/// it never occupies runtime storage.
#[derive(Clone, PartialEq, Debug)]
pub struct Symbol {
    pub ty: VarType,
    pub offset: i32,
    pub storage: StorageClass,
    pub value: Option<String>,
    pub used: bool,
}

impl Symbol {
    pub fn is_constant(&self) -> bool {
        self.value.is_some()
    }
}

/// Handle into a [`ScopeArena`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ScopeId(usize);

struct Scope {
    parent: Option<ScopeId>,
    symbols: HashMap<String, Symbol>,
    names: Vec<String>,
    current_decl_offset: i32,
}

/// Raised when a name is declared twice in the same scope.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Redeclaration(pub String);

impl fmt::Display for Redeclaration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "variable '{}' has already been declared", self.0)
    }
}

pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl Default for ScopeArena {
    fn default() -> ScopeArena {
        ScopeArena::new()
    }
}

impl ScopeArena {
    pub fn new() -> ScopeArena {
        ScopeArena { scopes: Vec::new() }
    }

    /// Opens a new scope. A child starts allocating where its parent stopped.
    pub fn push(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let offset = match parent {
            Some(id) => self.scope(id).current_decl_offset,
            None => 0,
        };
        self.scopes.push(Scope {
            parent,
            symbols: HashMap::new(),
            names: Vec::new(),
            current_decl_offset: offset,
        });
        ScopeId(self.scopes.len() - 1)
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.scope(id).parent
    }

    pub fn decl_offset(&self, id: ScopeId) -> i32 {
        self.scope(id).current_decl_offset
    }

    /// Copies a closed child scope's cursor back into the parent, so the
    /// child's slots stay allocated for the rest of the function.
    pub fn synchronize(&mut self, parent: ScopeId, child: ScopeId) {
        let offset = self.scope(child).current_decl_offset;
        self.scope_mut(parent).current_decl_offset = offset;
    }

    /// Declares a local. `count` is the element count for arrays, 1 for
    /// scalars; the slot offset is assigned after bumping the cursor.
    pub fn add_local(
        &mut self,
        id: ScopeId,
        name: &str,
        ty: VarType,
        count: i32,
    ) -> Result<Symbol, Redeclaration> {
        self.insert(id, name, ty, count, StorageClass::Block, None)
    }

    /// Declares a function parameter; same slot mechanics as a local.
    pub fn add_param(
        &mut self,
        id: ScopeId,
        name: &str,
        ty: VarType,
    ) -> Result<Symbol, Redeclaration> {
        self.insert(id, name, ty, 1, StorageClass::FunctionParams, None)
    }

    /// Declares a global; globals have no frame offset.
    pub fn add_global(
        &mut self,
        id: ScopeId,
        name: &str,
        ty: VarType,
    ) -> Result<Symbol, Redeclaration> {
        if self.scope(id).symbols.contains_key(name) {
            return Err(Redeclaration(name.to_string()));
        }
        let symbol = Symbol {
            ty,
            offset: 0,
            storage: StorageClass::Global,
            value: None,
            used: false,
        };
        let scope = self.scope_mut(id);
        scope.symbols.insert(name.to_string(), symbol.clone());
        scope.names.push(name.to_string());
        Ok(symbol)
    }

    /// Allocates an anonymous temporary slot and returns its synthetic name.
    pub fn add_temp(&mut self, id: ScopeId, ty: VarType) -> String {
        let scope = self.scope_mut(id);
        scope.current_decl_offset += SLOT_BYTES;
        let offset = scope.current_decl_offset;
        let name = temp_name(offset);
        scope.symbols.insert(
            name.clone(),
            Symbol {
                ty,
                offset,
                storage: StorageClass::Block,
                value: None,
                used: true,
            },
        );
        name
    }

    /// Creates a constant temporary: the literal is stored inline and the
    /// symbol never materializes in memory. The cursor still advances so the
    /// synthetic name stays unique.
    pub fn add_temp_const(&mut self, id: ScopeId, ty: VarType, value: String) -> String {
        let scope = self.scope_mut(id);
        scope.current_decl_offset += SLOT_BYTES;
        let offset = scope.current_decl_offset;
        let name = temp_name(offset);
        scope.symbols.insert(
            name.clone(),
            Symbol {
                ty,
                offset,
                storage: StorageClass::Block,
                value: Some(value),
                used: true,
            },
        );
        name
    }

    /// Releases the most recently allocated temporary, rewinding the cursor.
    ///
    /// Freeing when no temporary sits at the cursor is a compiler bug and
    /// panics.
    pub fn free_last_temp(&mut self, id: ScopeId) {
        let scope = self.scope_mut(id);
        if scope.current_decl_offset <= 0 {
            panic!("no temporary to free");
        }
        let name = temp_name(scope.current_decl_offset);
        match scope.symbols.remove(&name) {
            Some(_) => scope.current_decl_offset -= SLOT_BYTES,
            None => panic!("temporary '{}' not found", name),
        }
    }

    /// True when `name` is the temporary sitting at the scope's cursor.
    pub fn is_top_temp(&self, id: ScopeId, name: &str) -> bool {
        name == temp_name(self.scope(id).current_decl_offset)
    }

    /// Chained lookup, innermost scope outward.
    pub fn find_visible(&self, id: ScopeId, name: &str) -> Option<&Symbol> {
        let mut current = Some(id);
        while let Some(scope_id) = current {
            let scope = self.scope(scope_id);
            if let Some(symbol) = scope.symbols.get(name) {
                return Some(symbol);
            }
            current = scope.parent;
        }
        None
    }

    /// Lookup restricted to one scope; this is the redeclaration check.
    pub fn find_in_scope(&self, id: ScopeId, name: &str) -> Option<&Symbol> {
        self.scope(id).symbols.get(name)
    }

    /// Sets the usage bit on the nearest visible symbol called `name`.
    /// Returns false when the name does not resolve.
    pub fn mark_used(&mut self, id: ScopeId, name: &str) -> bool {
        let mut current = Some(id);
        while let Some(scope_id) = current {
            let scope = &mut self.scopes[scope_id.0];
            if let Some(symbol) = scope.symbols.get_mut(name) {
                symbol.used = true;
                return true;
            }
            current = scope.parent;
        }
        false
    }

    /// Names of the scope's unused non-temporary symbols, in declaration
    /// order. Consulted when the analyzer closes a scope.
    pub fn unused_names(&self, id: ScopeId) -> Vec<String> {
        let scope = self.scope(id);
        scope
            .names
            .iter()
            .filter(|name| !is_temp(name))
            .filter(|name| match scope.symbols.get(*name) {
                Some(symbol) => !symbol.used,
                None => false,
            })
            .cloned()
            .collect()
    }

    fn insert(
        &mut self,
        id: ScopeId,
        name: &str,
        ty: VarType,
        count: i32,
        storage: StorageClass,
        value: Option<String>,
    ) -> Result<Symbol, Redeclaration> {
        if self.scope(id).symbols.contains_key(name) {
            return Err(Redeclaration(name.to_string()));
        }
        let scope = self.scope_mut(id);
        scope.current_decl_offset += SLOT_BYTES * if count > 1 { count } else { 1 };
        let symbol = Symbol {
            ty,
            offset: scope.current_decl_offset,
            storage,
            value,
            used: false,
        };
        scope.symbols.insert(name.to_string(), symbol.clone());
        scope.names.push(name.to_string());
        Ok(symbol)
    }

    fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }
}

fn temp_name(offset: i32) -> String {
    format!("!tmp{}", offset)
}

/// Temporaries are recognized by their synthetic name prefix.
pub fn is_temp(name: &str) -> bool {
    name.starts_with("!tmp")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn locals_get_increasing_offsets() {
        let mut arena = ScopeArena::new();
        let scope = arena.push(None);
        let a = arena.add_local(scope, "a", VarType::Int, 1).unwrap();
        let b = arena.add_local(scope, "b", VarType::Int, 1).unwrap();
        assert_eq!(a.offset, 4);
        assert_eq!(b.offset, 8);
    }

    #[test]
    fn arrays_reserve_one_slot_per_element() {
        let mut arena = ScopeArena::new();
        let scope = arena.push(None);
        let table = arena.add_local(scope, "t", VarType::IntPtr, 5).unwrap();
        let next = arena.add_local(scope, "x", VarType::Int, 1).unwrap();
        assert_eq!(table.offset, 20);
        assert_eq!(next.offset, 24);
    }

    #[test]
    fn redeclaration_is_rejected_in_scope_only() {
        let mut arena = ScopeArena::new();
        let outer = arena.push(None);
        arena.add_local(outer, "a", VarType::Int, 1).unwrap();
        assert_eq!(
            arena.add_local(outer, "a", VarType::Int, 1),
            Err(Redeclaration("a".to_string()))
        );

        // Shadowing in a child scope is fine.
        let inner = arena.push(Some(outer));
        assert!(arena.add_local(inner, "a", VarType::Char, 1).is_ok());
    }

    #[test]
    fn child_inherits_cursor_and_synchronize_propagates_it() {
        let mut arena = ScopeArena::new();
        let outer = arena.push(None);
        arena.add_local(outer, "a", VarType::Int, 1).unwrap();

        let inner = arena.push(Some(outer));
        let b = arena.add_local(inner, "b", VarType::Int, 1).unwrap();
        assert_eq!(b.offset, 8);

        arena.synchronize(outer, inner);
        let c = arena.add_local(outer, "c", VarType::Int, 1).unwrap();
        assert_eq!(c.offset, 12);
    }

    #[test]
    fn temp_then_free_leaves_cursor_unchanged() {
        let mut arena = ScopeArena::new();
        let scope = arena.push(None);
        arena.add_local(scope, "a", VarType::Int, 1).unwrap();
        let before = arena.decl_offset(scope);

        let name = arena.add_temp(scope, VarType::Int);
        assert_eq!(name, "!tmp8");
        arena.free_last_temp(scope);
        assert_eq!(arena.decl_offset(scope), before);
        assert!(arena.find_in_scope(scope, &name).is_none());
    }

    #[test]
    fn constant_temps_carry_their_literal() {
        let mut arena = ScopeArena::new();
        let scope = arena.push(None);
        let name = arena.add_temp_const(scope, VarType::Int, "42".to_string());
        let symbol = arena.find_in_scope(scope, &name).unwrap();
        assert!(symbol.is_constant());
        assert_eq!(symbol.value.as_deref(), Some("42"));
    }

    #[test]
    #[should_panic(expected = "no temporary to free")]
    fn freeing_with_empty_cursor_is_a_bug() {
        let mut arena = ScopeArena::new();
        let scope = arena.push(None);
        arena.free_last_temp(scope);
    }

    #[test]
    fn lookup_walks_outward_and_marks_usage() {
        let mut arena = ScopeArena::new();
        let global = arena.push(None);
        arena.add_global(global, "g", VarType::Int).unwrap();
        let inner = arena.push(Some(global));

        assert!(arena.find_visible(inner, "g").is_some());
        assert!(arena.find_in_scope(inner, "g").is_none());

        assert!(arena.mark_used(inner, "g"));
        assert!(arena.unused_names(global).is_empty());
    }

    #[test]
    fn unused_names_keep_declaration_order() {
        let mut arena = ScopeArena::new();
        let scope = arena.push(None);
        arena.add_local(scope, "first", VarType::Int, 1).unwrap();
        arena.add_local(scope, "second", VarType::Int, 1).unwrap();
        arena.add_temp(scope, VarType::Int);
        assert_eq!(arena.unused_names(scope), vec!["first", "second"]);
    }
}
