//! Load order of declared projects.
//!
//! Dependencies are informational: they decide which project is set up
//! first and which roots a build script sees, but a missing or cyclic
//! dependency never prevents a project from being supervised.

use crate::project::ProjectDecl;
use crate::{FxHashMap, FxHashSet};

/// The result of ordering declarations by their dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyOrder {
    /// Indices into the declaration slice, dependencies first.
    pub order: Vec<usize>,

    /// `(project, dependency)` pairs naming undeclared projects.
    pub unknown: Vec<(String, String)>,

    /// Projects caught in a dependency cycle. They are appended to
    /// [`order`](Self::order) in declaration order.
    pub cyclic: Vec<String>,
}

/// Orders `decls` so every project comes after the declared projects it
/// depends on.
///
/// The sort is stable: independent projects keep their declaration order.
///
/// # Examples
///
/// ```
/// use ab_core::{ProjectDecl, dependency_order};
///
/// let decls = vec![
///     ProjectDecl::new("web", "/src/web").with_depends(["tools"]),
///     ProjectDecl::new("tools", "/src/tools"),
/// ];
/// let order = dependency_order(&decls);
///
/// assert_eq!(order.order, vec![1, 0]);
/// assert!(order.cyclic.is_empty());
/// ```
#[must_use]
pub fn dependency_order(decls: &[ProjectDecl]) -> DependencyOrder {
    let index: FxHashMap<&str, usize> = decls
        .iter()
        .enumerate()
        .map(|(i, decl)| (decl.name.as_str(), i))
        .collect();

    let mut unknown = Vec::new();
    let mut pending: Vec<usize> = vec![0; decls.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); decls.len()];

    for (i, decl) in decls.iter().enumerate() {
        let mut seen = FxHashSet::default();
        for dep in &decl.depends {
            if !seen.insert(dep.as_str()) {
                continue;
            }
            match index.get(dep.as_str()) {
                Some(&d) if d != i => {
                    pending[i] += 1;
                    dependents[d].push(i);
                }
                Some(_) => {}
                None => unknown.push((decl.name.clone(), dep.clone())),
            }
        }
    }

    let mut order = Vec::with_capacity(decls.len());
    let mut placed = vec![false; decls.len()];

    // Repeatedly take the first ready declaration to keep the sort stable.
    while let Some(next) = (0..decls.len()).find(|&i| !placed[i] && pending[i] == 0) {
        placed[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
        }
    }

    let mut cyclic = Vec::new();
    for (i, decl) in decls.iter().enumerate() {
        if !placed[i] {
            cyclic.push(decl.name.clone());
            order.push(i);
        }
    }

    DependencyOrder {
        order,
        unknown,
        cyclic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, depends: &[&str]) -> ProjectDecl {
        ProjectDecl::new(name, format!("/src/{name}")).with_depends(depends.iter().copied())
    }

    #[test]
    fn test_independent_projects_keep_declaration_order() {
        let decls = vec![decl("a", &[]), decl("b", &[]), decl("c", &[])];
        assert_eq!(dependency_order(&decls).order, vec![0, 1, 2]);
    }

    #[test]
    fn test_chain_is_reversed() {
        let decls = vec![decl("app", &["lib"]), decl("lib", &["base"]), decl("base", &[])];
        let order = dependency_order(&decls);
        assert_eq!(order.order, vec![2, 1, 0]);
        assert!(order.unknown.is_empty());
    }

    #[test]
    fn test_unknown_dependencies_are_reported() {
        let decls = vec![decl("app", &["github.com/acme/lib", "tools"]), decl("tools", &[])];
        let order = dependency_order(&decls);
        assert_eq!(order.order, vec![1, 0]);
        assert_eq!(
            order.unknown,
            vec![("app".to_owned(), "github.com/acme/lib".to_owned())]
        );
    }

    #[test]
    fn test_cycles_are_appended() {
        let decls = vec![decl("x", &["y"]), decl("free", &[]), decl("y", &["x"])];
        let order = dependency_order(&decls);
        assert_eq!(order.order, vec![1, 0, 2]);
        assert_eq!(order.cyclic, vec!["x", "y"]);
    }

    #[test]
    fn test_duplicate_dependency_counts_once() {
        let decls = vec![decl("app", &["lib", "lib"]), decl("lib", &[])];
        assert_eq!(dependency_order(&decls).order, vec![1, 0]);
    }
}
