//! Variable, alias, function and environment stores
//!
//! All stores synchronize internally so a [`ShellContext`] can be shared by
//! reference with the worker threads of a built-in pipeline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// A named-value map behind a lock
#[derive(Debug, Default)]
pub struct MapStore<V> {
    inner: RwLock<BTreeMap<String, V>>,
}

impl<V: Clone> MapStore<V> {
    pub fn new() -> Self {
        MapStore {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<V> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).cloned()
    }

    pub fn set(&self, name: &str, value: V) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(name.to_string(), value);
    }

    /// Remove a name, returning whether it existed
    pub fn unset(&self, name: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.contains_key(name)
    }

    pub fn list(&self) -> BTreeMap<String, V> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Alias name to replacement text
pub type AliasStore = MapStore<String>;

/// Function name to body lines
pub type FunctionStore = MapStore<Vec<String>>;

#[derive(Debug, Default)]
struct Scopes {
    globals: BTreeMap<String, String>,
    frames: Vec<BTreeMap<String, String>>,
}

/// Shell variables with a stack of function-call scopes.
///
/// Lookups search the innermost scope outwards, then globals, then the
/// process environment. Writes go to the innermost scope, or to globals when
/// no function is running.
#[derive(Debug, Default)]
pub struct VariableStore {
    inner: RwLock<Scopes>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        let scopes = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        scopes
            .frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| scopes.globals.get(name))
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    pub fn set(&self, name: &str, value: &str) {
        let mut scopes = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(frame) = scopes.frames.last_mut() {
            frame.insert(name.to_string(), value.to_string());
        } else {
            scopes.globals.insert(name.to_string(), value.to_string());
        }
    }

    /// Remove from the innermost scope and from globals
    pub fn unset(&self, name: &str) {
        let mut scopes = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(frame) = scopes.frames.last_mut() {
            frame.remove(name);
        }
        scopes.globals.remove(name);
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Shell variables (not the environment), inner scopes overriding outer ones
    pub fn list(&self) -> BTreeMap<String, String> {
        let scopes = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut all = scopes.globals.clone();
        for frame in &scopes.frames {
            all.extend(frame.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        all
    }

    pub fn push_scope(&self) {
        let mut scopes = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        scopes.frames.push(BTreeMap::new());
    }

    pub fn pop_scope(&self) {
        let mut scopes = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        scopes.frames.pop();
    }

    pub fn scope_depth(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .len()
    }
}

/// The process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvStore;

impl EnvStore {
    pub fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    pub fn set(&self, name: &str, value: &str) {
        std::env::set_var(name, value);
    }

    pub fn unset(&self, name: &str) {
        std::env::remove_var(name);
    }

    pub fn has(&self, name: &str) -> bool {
        std::env::var_os(name).is_some()
    }

    pub fn list(&self) -> BTreeMap<String, String> {
        std::env::vars().collect()
    }
}

/// Everything a command may read or change, shared by the driver and the
/// pipeline workers.
#[derive(Debug, Default)]
pub struct ShellContext {
    pub vars: VariableStore,
    pub aliases: AliasStore,
    pub functions: FunctionStore,
    pub env: EnvStore,
    last_status: AtomicI32,
    exit_request: Mutex<Option<i32>>,
}

impl ShellContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit status of the most recent command (`$?`)
    pub fn last_status(&self) -> i32 {
        self.last_status.load(Ordering::SeqCst)
    }

    pub fn set_last_status(&self, status: i32) {
        self.last_status.store(status, Ordering::SeqCst);
    }

    /// Ask the shell to stop after the current command
    pub fn request_exit(&self, code: i32) {
        *self.exit_request.lock().unwrap_or_else(PoisonError::into_inner) = Some(code);
    }

    pub fn exit_requested(&self) -> Option<i32> {
        *self.exit_request.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Withdraw a pending exit request, returning it
    pub fn take_exit_request(&self) -> Option<i32> {
        self.exit_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// True for a non-empty run of ASCII letters, digits and underscores
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_store_basics() {
        let aliases = AliasStore::new();
        assert!(!aliases.has("ll"));
        aliases.set("ll", "ls -l".to_string());
        assert_eq!(aliases.get("ll").as_deref(), Some("ls -l"));
        assert_eq!(aliases.list().len(), 1);
        assert!(aliases.unset("ll"));
        assert!(!aliases.unset("ll"));
        assert_eq!(aliases.get("ll"), None);
    }

    #[test]
    fn scopes_shadow_and_unwind() {
        let vars = VariableStore::new();
        vars.set("termish_test_x", "outer");
        vars.push_scope();
        assert_eq!(vars.get("termish_test_x").as_deref(), Some("outer"));
        vars.set("termish_test_x", "inner");
        assert_eq!(vars.get("termish_test_x").as_deref(), Some("inner"));
        assert_eq!(vars.list()["termish_test_x"], "inner");
        vars.pop_scope();
        assert_eq!(vars.get("termish_test_x").as_deref(), Some("outer"));
        assert_eq!(vars.scope_depth(), 0);
    }

    #[test]
    fn unset_clears_scope_and_globals() {
        let vars = VariableStore::new();
        vars.set("termish_test_y", "1");
        vars.push_scope();
        vars.set("termish_test_y", "2");
        vars.unset("termish_test_y");
        assert!(!vars.has("termish_test_y"));
    }

    #[test]
    fn variables_fall_back_to_environment() {
        let vars = VariableStore::new();
        std::env::set_var("TERMISH_STORE_FALLBACK", "from-env");
        assert_eq!(vars.get("TERMISH_STORE_FALLBACK").as_deref(), Some("from-env"));
        std::env::remove_var("TERMISH_STORE_FALLBACK");
    }

    #[test]
    fn exit_request_is_recorded() {
        let ctx = ShellContext::new();
        assert_eq!(ctx.exit_requested(), None);
        ctx.request_exit(3);
        assert_eq!(ctx.exit_requested(), Some(3));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("PATH"));
        assert!(is_identifier("my_var2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("a b"));
    }
}
