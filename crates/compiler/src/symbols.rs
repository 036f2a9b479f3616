//! Scoped symbol tables
//!
//! Scopes form a tree; resolution walks from the innermost scope outward,
//! so the nearest enclosing binding wins. Symbols reference their AST
//! declaration by [`NodeId`], never by owning pointer, which keeps the
//! tree free of cycles.

use crate::ast::NodeId;
use crate::span::Span;
use crate::types::TypeId;
use std::collections::HashMap;

/// Stable handle to a declared symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    External,
    Type,
    Variable { mutable: bool },
    Parameter,
    Module,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    /// The declaring AST node
    pub node: NodeId,
    pub span: Span,
    pub ty: Option<TypeId>,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<usize>,
    names: HashMap<String, SymbolId>,
}

/// Tree of lexical scopes plus the flat symbol arena.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<Scope>,
    current: usize,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            scopes: vec![Scope::default()],
            current: 0,
        }
    }

    /// Open a child scope and make it current.
    pub fn enter_scope(&mut self) {
        let scope = Scope {
            parent: Some(self.current),
            names: HashMap::new(),
        };
        self.scopes.push(scope);
        self.current = self.scopes.len() - 1;
    }

    /// Return to the parent scope. The child stays allocated so symbol ids
    /// remain valid.
    pub fn exit_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current].parent {
            self.current = parent;
        }
    }

    /// Declare a name in the current scope.
    ///
    /// A clash with an existing name in the *same* scope returns the
    /// earlier symbol's id so the caller can point its diagnostic back at
    /// the first definition.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        kind: SymbolKind,
        node: NodeId,
        span: Span,
        ty: Option<TypeId>,
    ) -> Result<SymbolId, SymbolId> {
        let name = name.into();
        if let Some(&existing) = self.scopes[self.current].names.get(&name) {
            return Err(existing);
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: name.clone(),
            kind,
            node,
            span,
            ty,
        });
        self.scopes[self.current].names.insert(name, id);
        Ok(id)
    }

    /// Resolve a name through the scope chain, nearest-enclosing first.
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        let mut scope = Some(self.current);
        while let Some(index) = scope {
            if let Some(&id) = self.scopes[index].names.get(name) {
                return Some(&self.symbols[id.0 as usize]);
            }
            scope = self.scopes[index].parent;
        }
        None
    }

    /// Resolve only in the current scope, ignoring parents.
    pub fn resolve_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes[self.current]
            .names
            .get(name)
            .map(|&id| &self.symbols[id.0 as usize])
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::default()
    }

    #[test]
    fn test_declare_and_resolve() {
        let mut table = SymbolTable::new();
        let id = table
            .declare("x", SymbolKind::Variable { mutable: false }, NodeId(1), span(), None)
            .unwrap();
        let found = table.resolve("x").unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.name, "x");
        assert!(table.resolve("y").is_none());
    }

    #[test]
    fn test_duplicate_in_same_scope_reports_original() {
        let mut table = SymbolTable::new();
        let first = table
            .declare("f", SymbolKind::Function, NodeId(1), span(), None)
            .unwrap();
        let clash = table.declare("f", SymbolKind::Function, NodeId(2), span(), None);
        assert_eq!(clash, Err(first));
    }

    #[test]
    fn test_shadowing_in_inner_scope() {
        let mut table = SymbolTable::new();
        let outer = table
            .declare("x", SymbolKind::Variable { mutable: false }, NodeId(1), span(), None)
            .unwrap();
        table.enter_scope();
        // Same name in a child scope is fine and shadows the outer one
        let inner = table
            .declare("x", SymbolKind::Variable { mutable: true }, NodeId(2), span(), None)
            .unwrap();
        assert_eq!(table.resolve("x").unwrap().id, inner);
        table.exit_scope();
        assert_eq!(table.resolve("x").unwrap().id, outer);
    }

    #[test]
    fn test_nearest_enclosing_scope_wins() {
        let mut table = SymbolTable::new();
        table
            .declare("a", SymbolKind::Variable { mutable: false }, NodeId(1), span(), None)
            .unwrap();
        table.enter_scope();
        table
            .declare("b", SymbolKind::Variable { mutable: false }, NodeId(2), span(), None)
            .unwrap();
        table.enter_scope();
        // Both outer names visible from the innermost scope
        assert!(table.resolve("a").is_some());
        assert!(table.resolve("b").is_some());
        assert!(table.resolve_local("a").is_none());
    }
}
