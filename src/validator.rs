//! Static pre-execution checks over the script's Python syntax tree.
//!
//! This is an advisory denylist: calls are matched by name, not by type, so a
//! determined script can still reach dangerous functionality through aliases.
//! The resource ceilings and the supervisory kill in [`crate::sandbox`] are the
//! layer that actually bounds what an accepted script can do.

use crate::policy::CapabilityPolicy;
use rustpython_ast::Visitor;
use rustpython_parser::{ast, Parse};
use std::fmt;

pub const ENTRY_POINT: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub reason: String,
}

impl ValidationOutcome {
    fn accept() -> Self {
        Self {
            accepted: true,
            reason: String::new(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }

    /// Convert into a `Result`, so callers can propagate a rejection with `?`.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.accepted {
            Ok(())
        } else {
            Err(ValidationError {
                reason: self.reason,
            })
        }
    }
}

/// The caller's script was rejected before anything ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: CapabilityPolicy,
}

impl Validator {
    pub fn new(policy: CapabilityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    /// Parse `script` and return the first policy violation, if any.
    pub fn check(&self, script: &str) -> ValidationOutcome {
        let suite = match ast::Suite::parse(script, "<script>") {
            Ok(suite) => suite,
            Err(e) => return ValidationOutcome::reject(format!("syntax error: {}", e)),
        };

        if let Err(reason) = check_entry_point(&suite) {
            return ValidationOutcome::reject(reason);
        }

        let mut walker = PolicyWalker {
            policy: &self.policy,
            violation: None,
        };
        for stmt in suite {
            walker.visit_stmt(stmt);
            if walker.violation.is_some() {
                break;
            }
        }

        match walker.violation {
            Some(reason) => ValidationOutcome::reject(reason),
            None => ValidationOutcome::accept(),
        }
    }
}

/// Exactly one top-level `def main` that can be called without arguments.
fn check_entry_point(suite: &[ast::Stmt]) -> Result<(), String> {
    let defs: Vec<&ast::StmtFunctionDef> = suite
        .iter()
        .filter_map(|stmt| match stmt {
            ast::Stmt::FunctionDef(def) if def.name.as_str() == ENTRY_POINT => Some(def),
            _ => None,
        })
        .collect();

    let def = match defs.as_slice() {
        [] => return Err("missing entry point".to_string()),
        [def] => *def,
        many => {
            return Err(format!(
                "ambiguous entry point: {} is defined {} times",
                ENTRY_POINT,
                many.len()
            ))
        }
    };

    let args = &def.args;
    let required = args
        .posonlyargs
        .iter()
        .chain(args.args.iter())
        .chain(args.kwonlyargs.iter())
        .filter(|arg| arg.default.is_none())
        .count();
    if required > 0 {
        return Err(format!(
            "entry point {} must not require parameters",
            ENTRY_POINT
        ));
    }
    Ok(())
}

/// Pre-order walk that records the first violation and then stops checking.
struct PolicyWalker<'a> {
    policy: &'a CapabilityPolicy,
    violation: Option<String>,
}

impl PolicyWalker<'_> {
    fn flag(&mut self, reason: String) {
        if self.violation.is_none() {
            self.violation = Some(reason);
        }
    }
}

impl Visitor for PolicyWalker<'_> {
    fn visit_stmt_import(&mut self, node: ast::StmtImport) {
        for alias in &node.names {
            let module = alias.name.as_str();
            if !self.policy.is_import_allowed(module) {
                self.flag(format!("import '{}' is not allowed", module));
                return;
            }
        }
    }

    fn visit_stmt_import_from(&mut self, node: ast::StmtImportFrom) {
        // `from . import x` has no module name and stays inside the script's own package.
        if let Some(module) = &node.module {
            let module = module.as_str();
            if !self.policy.is_import_allowed(module) {
                self.flag(format!("import from '{}' is not allowed", module));
                return;
            }
        }
        // A bare `fork()` after `from os import fork` never reaches the method check.
        for alias in &node.names {
            let name = alias.name.as_str();
            if self.policy.is_spawn_method(name) {
                self.flag(format!("import of '{}' is not allowed", name));
                return;
            }
        }
    }

    fn visit_expr_call(&mut self, node: ast::ExprCall) {
        if self.violation.is_some() {
            return;
        }
        match &*node.func {
            ast::Expr::Name(name) if self.policy.is_dynamic_call(name.id.as_str()) => {
                self.flag(format!("call to '{}' is not allowed", name.id.as_str()));
                return;
            }
            ast::Expr::Attribute(attr) if self.policy.is_spawn_method(attr.attr.as_str()) => {
                self.flag(format!("method '{}' is not allowed", attr.attr.as_str()));
                return;
            }
            _ => {}
        }
        self.generic_visit_expr_call(node);
    }

    // The generated walker stops at these product nodes, so calls nested in
    // keyword values, comprehensions, defaults, `with` items and match arms
    // need explicit recursion.

    fn visit_keyword(&mut self, node: ast::Keyword) {
        self.visit_expr(node.value);
    }

    fn visit_comprehension(&mut self, node: ast::Comprehension) {
        self.visit_expr(node.target);
        self.visit_expr(node.iter);
        for cond in node.ifs {
            self.visit_expr(cond);
        }
    }

    fn visit_arguments(&mut self, node: ast::Arguments) {
        let with_defaults = node
            .posonlyargs
            .into_iter()
            .chain(node.args)
            .chain(node.kwonlyargs);
        for arg in with_defaults {
            if let Some(annotation) = arg.def.annotation {
                self.visit_expr(*annotation);
            }
            if let Some(default) = arg.default {
                self.visit_expr(*default);
            }
        }
        for arg in node.vararg.into_iter().chain(node.kwarg) {
            if let Some(annotation) = arg.annotation {
                self.visit_expr(*annotation);
            }
        }
    }

    fn visit_withitem(&mut self, node: ast::WithItem) {
        self.visit_expr(node.context_expr);
        if let Some(vars) = node.optional_vars {
            self.visit_expr(*vars);
        }
    }

    fn visit_match_case(&mut self, node: ast::MatchCase) {
        if let Some(guard) = node.guard {
            self.visit_expr(*guard);
        }
        for stmt in node.body {
            self.visit_stmt(stmt);
        }
    }
}
