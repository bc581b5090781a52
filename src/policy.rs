use std::collections::BTreeSet;

/// Libraries a script is expected to import.
const ALLOWED_IMPORTS: &[&str] = &[
    "os",
    "pandas",
    "numpy",
    "json",
    "math",
    "random",
    "datetime",
    "time",
    "collections",
];

/// Module, builtin and attribute names that are rejected even if allowed elsewhere.
const DENIED_SYMBOLS: &[&str] = &[
    "subprocess",
    "__import__",
    "eval",
    "exec",
    "compile",
    "open",
    "file",
    "input",
    "raw_input",
    "reload",
    "vars",
    "globals",
    "locals",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "socket",
    "urllib",
    "urllib2",
    "httplib",
    "requests",
    "sys",
    "importlib",
    "pkgutil",
    "imp",
];

const DYNAMIC_EXECUTION_CALLS: &[&str] = &["eval", "exec", "compile", "__import__"];

/// Process creation, plus the calls that would move a child out of the
/// process group the executor kills.
const PROCESS_SPAWN_METHODS: &[&str] = &[
    "system",
    "popen",
    "spawn",
    "fork",
    "forkpty",
    "setsid",
    "setpgid",
    "setpgrp",
    "daemon",
    "posix_spawn",
    "posix_spawnp",
];

fn to_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// The allow/deny configuration the validator enforces.
///
/// Deny always wins. With `strict_imports` off, a module that is not on the
/// allow-list is still accepted unless its name looks private (leading `_`).
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    pub allowed_imports: BTreeSet<String>,
    pub denied_symbols: BTreeSet<String>,
    pub dynamic_calls: BTreeSet<String>,
    pub spawn_methods: BTreeSet<String>,
    pub strict_imports: bool,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self {
            allowed_imports: to_set(ALLOWED_IMPORTS),
            denied_symbols: to_set(DENIED_SYMBOLS),
            dynamic_calls: to_set(DYNAMIC_EXECUTION_CALLS),
            spawn_methods: to_set(PROCESS_SPAWN_METHODS),
            strict_imports: false,
        }
    }
}

impl CapabilityPolicy {
    /// Default policy that only accepts modules from the allow-list.
    pub fn strict() -> Self {
        Self {
            strict_imports: true,
            ..Self::default()
        }
    }

    /// Whether `module` (possibly dotted, e.g. `urllib.request`) may be imported.
    pub fn is_import_allowed(&self, module: &str) -> bool {
        let root = module.split('.').next().unwrap_or(module);

        if self.denied_symbols.contains(module) || self.denied_symbols.contains(root) {
            return false;
        }

        let listed = self.allowed_imports.contains(module) || self.allowed_imports.contains(root);
        if listed {
            return true;
        }
        if self.strict_imports {
            return false;
        }
        !module.starts_with('_')
    }

    pub fn is_dynamic_call(&self, name: &str) -> bool {
        self.dynamic_calls.contains(name)
    }

    pub fn is_spawn_method(&self, name: &str) -> bool {
        self.spawn_methods.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_module_passes() {
        let policy = CapabilityPolicy::default();
        assert!(policy.is_import_allowed("math"));
        assert!(policy.is_import_allowed("os"));
        assert!(policy.is_import_allowed("os.path"));
    }

    #[test]
    fn test_denied_module_blocked() {
        let policy = CapabilityPolicy::default();
        assert!(!policy.is_import_allowed("subprocess"));
        assert!(!policy.is_import_allowed("socket"));
        assert!(!policy.is_import_allowed("sys"));
    }

    #[test]
    fn test_denied_package_blocks_submodules() {
        let policy = CapabilityPolicy::default();
        assert!(!policy.is_import_allowed("urllib.request"));
        assert!(!policy.is_import_allowed("importlib.util"));
    }

    #[test]
    fn test_unlisted_public_module_is_permitted() {
        let policy = CapabilityPolicy::default();
        assert!(policy.is_import_allowed("itertools"));
        assert!(policy.is_import_allowed("string"));
    }

    #[test]
    fn test_unlisted_private_module_blocked() {
        let policy = CapabilityPolicy::default();
        assert!(!policy.is_import_allowed("_thread"));
        assert!(!policy.is_import_allowed("_posixsubprocess"));
    }

    #[test]
    fn test_strict_policy_only_allows_listed() {
        let policy = CapabilityPolicy::strict();
        assert!(policy.is_import_allowed("json"));
        assert!(policy.is_import_allowed("collections.abc"));
        assert!(!policy.is_import_allowed("itertools"));
        assert!(!policy.is_import_allowed("subprocess"));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let mut policy = CapabilityPolicy::default();
        policy.allowed_imports.insert("socket".to_string());
        assert!(!policy.is_import_allowed("socket"));
    }

    #[test]
    fn test_call_sets() {
        let policy = CapabilityPolicy::default();
        assert!(policy.is_dynamic_call("eval"));
        assert!(policy.is_dynamic_call("__import__"));
        assert!(!policy.is_dynamic_call("print"));
        assert!(policy.is_spawn_method("popen"));
        assert!(!policy.is_spawn_method("join"));
    }

    #[test]
    fn test_process_group_escapes_are_spawn_methods() {
        let policy = CapabilityPolicy::default();
        for name in ["fork", "forkpty", "setsid", "setpgid", "setpgrp", "posix_spawn"] {
            assert!(policy.is_spawn_method(name), "{} should be blocked", name);
        }
        assert!(!policy.is_spawn_method("getpid"));
    }
}
