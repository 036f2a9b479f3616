//! Import resolver
//!
//! Resolves `import a.b.c` declarations against the configured search
//! paths, parses each module once, and returns modules in dependency
//! order (dependencies before dependents). Import loading is sequential
//! and acyclic; a visited/on-stack tri-state catches cycles and reports
//! the full path.

use crate::ast::{Declaration, Program};
use crate::diagnostics::{codes, Diagnostic};
use crate::parser::Parser;
use crate::span::Span;
use crate::token::Dialect;
use std::collections::HashMap;
use std::path::PathBuf;

/// One loaded module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Qualified dotted name, e.g. "math.vector"
    pub name: String,
    pub path: PathBuf,
    pub program: Program,
}

/// Every module reachable from the entry program, dependencies first.
#[derive(Debug, Default)]
pub struct ModuleSet {
    pub modules: Vec<Module>,
}

impl ModuleSet {
    pub fn find(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// Tri-state module visit marker. Absence from the map means unvisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    /// On the current import stack; seeing it again is a cycle
    InProgress,
    Loaded,
}

pub struct Resolver {
    search_paths: Vec<PathBuf>,
    states: HashMap<String, VisitState>,
    /// Import chain currently being loaded, for cycle reporting
    stack: Vec<String>,
    loaded: Vec<Module>,
    diagnostics: Vec<Diagnostic>,
}

impl Resolver {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Resolver {
            search_paths,
            states: HashMap::new(),
            stack: Vec::new(),
            loaded: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Load everything the entry program imports, transitively.
    pub fn resolve(mut self, program: &Program) -> (ModuleSet, Vec<Diagnostic>) {
        for declaration in &program.declarations {
            if let Declaration::Import(import) = declaration {
                self.load_module(&import.dotted(), &import.span);
            }
        }
        tracing::debug!(modules = self.loaded.len(), "import graph resolved");
        (
            ModuleSet {
                modules: self.loaded,
            },
            self.diagnostics,
        )
    }

    /// Clear the module cache so a kept resolver starts cold.
    pub fn reset(&mut self) {
        self.states.clear();
        self.stack.clear();
        self.loaded.clear();
        self.diagnostics.clear();
    }

    fn load_module(&mut self, name: &str, span: &Span) {
        match self.states.get(name) {
            Some(VisitState::Loaded) => return,
            Some(VisitState::InProgress) => {
                // The cycle runs from the earlier occurrence on the stack
                // back to this import.
                let start = self
                    .stack
                    .iter()
                    .position(|entry| entry == name)
                    .unwrap_or(0);
                let mut cycle: Vec<&str> =
                    self.stack[start..].iter().map(String::as_str).collect();
                cycle.push(name);
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::CIRCULAR_DEPENDENCY,
                        span.clone(),
                        format!("circular import: {}", cycle.join(" -> ")),
                    )
                    .with_hint("break the cycle by moving the shared declarations into a third module"),
                );
                return;
            }
            None => {}
        }

        let Some(path) = self.find_module_file(name) else {
            let tried: Vec<String> = self
                .search_paths
                .iter()
                .map(|sp| sp.join(module_relative_path(name, "rf")).display().to_string())
                .collect();
            self.diagnostics.push(
                Diagnostic::error(
                    codes::MODULE_NOT_FOUND,
                    span.clone(),
                    format!("module '{}' not found", name),
                )
                .with_hint(format!("searched: {}", tried.join(", "))),
            );
            return;
        };

        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "module read failed");
                self.diagnostics.push(Diagnostic::error(
                    codes::MODULE_NOT_FOUND,
                    span.clone(),
                    format!("failed to read '{}': {}", path.display(), error),
                ));
                return;
            }
        };

        self.states
            .insert(name.to_string(), VisitState::InProgress);
        self.stack.push(name.to_string());

        let dialect = Dialect::from_path(&path);
        let (program, mut parse_diagnostics) =
            Parser::new(&source, path.clone(), dialect).parse();
        self.diagnostics.append(&mut parse_diagnostics);

        // Load this module's own imports before registering it, so the
        // loaded list stays in dependency order.
        for declaration in &program.declarations {
            if let Declaration::Import(import) = declaration {
                self.load_module(&import.dotted(), &import.span);
            }
        }

        self.stack.pop();
        self.states.insert(name.to_string(), VisitState::Loaded);
        tracing::debug!(module = name, path = %path.display(), "module loaded");
        self.loaded.push(Module {
            name: name.to_string(),
            path,
            program,
        });
    }

    fn find_module_file(&self, name: &str) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            for extension in ["rf", "sf"] {
                let candidate = search_path.join(module_relative_path(name, extension));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

/// "a.b.c" -> "a/b/c.<ext>"
fn module_relative_path(name: &str, extension: &str) -> PathBuf {
    let mut path: PathBuf = name.split('.').collect();
    path.set_extension(extension);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn parse_entry(source: &str) -> Program {
        let (program, diagnostics) =
            Parser::new(source, "main.rf", Dialect::RazorForge).parse();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        program
    }

    #[test]
    fn test_loads_single_module() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("util.rf"),
            "routine helper() -> s64 { return 7 }\n",
        )
        .unwrap();

        let program = parse_entry("import util\n");
        let resolver = Resolver::new(vec![dir.path().to_path_buf()]);
        let (modules, diagnostics) = resolver.resolve(&program);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(modules.modules.len(), 1);
        assert_eq!(modules.modules[0].name, "util");
        assert!(modules.find("util").unwrap().program.find_function("helper").is_some());
    }

    #[test]
    fn test_nested_path_and_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("math")).unwrap();
        fs::write(
            dir.path().join("math/vector.rf"),
            "import math.scalar\nroutine dot() -> s64 { return 0 }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("math/scalar.rf"),
            "routine one() -> s64 { return 1 }\n",
        )
        .unwrap();

        let program = parse_entry("import math.vector\n");
        let resolver = Resolver::new(vec![dir.path().to_path_buf()]);
        let (modules, diagnostics) = resolver.resolve(&program);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let names: Vec<&str> = modules.modules.iter().map(|m| m.name.as_str()).collect();
        // Dependencies come first
        assert_eq!(names, vec!["math.scalar", "math.vector"]);
    }

    #[test]
    fn test_module_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rf"), "import c\nroutine fa() { return }\n").unwrap();
        fs::write(dir.path().join("b.rf"), "import c\nroutine fb() { return }\n").unwrap();
        fs::write(dir.path().join("c.rf"), "routine fc() { return }\n").unwrap();

        let program = parse_entry("import a\nimport b\n");
        let resolver = Resolver::new(vec![dir.path().to_path_buf()]);
        let (modules, diagnostics) = resolver.resolve(&program);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let count = modules.modules.iter().filter(|m| m.name == "c").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_import_cycle_reports_full_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rf"), "import b\n").unwrap();
        fs::write(dir.path().join("b.rf"), "import a\n").unwrap();

        let program = parse_entry("import a\n");
        let resolver = Resolver::new(vec![dir.path().to_path_buf()]);
        let (_, diagnostics) = resolver.resolve(&program);
        let cycle = diagnostics
            .iter()
            .find(|d| d.code == codes::CIRCULAR_DEPENDENCY)
            .expect("expected an ES009 diagnostic");
        assert!(cycle.message.contains("a -> b -> a"));
    }

    #[test]
    fn test_missing_module_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let program = parse_entry("import ghost\n");
        let resolver = Resolver::new(vec![dir.path().to_path_buf()]);
        let (_, diagnostics) = resolver.resolve(&program);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, codes::MODULE_NOT_FOUND);
        assert!(diagnostics[0].hint.as_deref().unwrap().contains("ghost"));
    }

    #[test]
    fn test_surface_dialect_module() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("sweet.sf"),
            "recipe candy() -> s64:\n    return 3\n",
        )
        .unwrap();

        let program = parse_entry("import sweet\n");
        let resolver = Resolver::new(vec![dir.path().to_path_buf()]);
        let (modules, diagnostics) = resolver.resolve(&program);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert!(modules.find("sweet").unwrap().program.find_function("candy").is_some());
    }
}
