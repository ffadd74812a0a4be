use super::BlockFn;
use crate::view::environment::Environment;
use crate::view::template::Value;

use parking_lot::Mutex;
use std::collections::HashMap;

/// The render context shared by a template and everything it extends.
///
/// Variables passed in at creation are immutable; top-level `set`,
/// `import` and `macro` write into the assigned variables, which
/// modules later export.
pub struct Context {
    environment: Environment,
    name: String,
    vars: HashMap<String, Value>,
    assigned: Mutex<HashMap<String, Value>>,
    // Override chains, most derived template first.
    blocks: Mutex<HashMap<String, Vec<BlockFn>>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("vars", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Context {
    pub fn new(
        environment: Environment,
        name: impl ToString,
        vars: HashMap<String, Value>,
        blocks: HashMap<String, Vec<BlockFn>>,
    ) -> Self {
        Self {
            environment,
            name: name.to_string(),
            vars,
            assigned: Mutex::new(HashMap::new()),
            blocks: Mutex::new(blocks),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Name of the template the context was created for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve(&self, key: &str) -> Option<Value> {
        let assigned = self.assigned.lock().get(key).cloned();
        assigned.or_else(|| self.vars.get(key).cloned())
    }

    /// All variables visible in the context.
    pub fn get_all(&self) -> HashMap<String, Value> {
        let mut all = self.vars.clone();
        all.extend(
            self.assigned
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        all
    }

    pub fn assign(&self, key: &str, value: Value) {
        self.assigned.lock().insert(key.to_string(), value);
    }

    /// Top-level assignments, except for names starting with `_`.
    pub fn exported(&self) -> HashMap<String, Value> {
        self.assigned
            .lock()
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn block_chain(&self, name: &str) -> Vec<BlockFn> {
        self.blocks.lock().get(name).cloned().unwrap_or_default()
    }

    /// Parent blocks go after the existing overrides, so the
    /// most derived block stays first.
    pub fn push_parent_blocks<'a>(&self, blocks: impl Iterator<Item = (&'a String, &'a BlockFn)>) {
        let mut chains = self.blocks.lock();
        for (name, block) in blocks {
            chains.entry(name.clone()).or_default().push(block.clone());
        }
    }

    /// A copy of the context with the locals added, used by scoped blocks.
    pub fn derived(&self, locals: &HashMap<String, Value>) -> Context {
        let mut vars = self.get_all();
        vars.extend(locals.iter().map(|(k, v)| (k.clone(), v.clone())));

        Context::new(
            self.environment.clone(),
            &self.name,
            vars,
            self.blocks.lock().clone(),
        )
    }
}
