//! User variables and expression evaluation.
//!
//! A user variable holds either a literal [`Value`] or an expression entered
//! with the `$eval:` prefix. Expressions are Rhai code evaluated with every
//! other user variable in scope as a constant, plus a `device("psu.ch1.voltage")`
//! function that reads a station variable when a station is attached:
//!
//! ```text
//! span   = 10.5
//! start  = $eval: device("laser.wavelength") - span / 2
//! label  = $eval: "scan from " + start + " nm"
//! ```
//!
//! The process-global [`VARIABLES`] store backs the CLI; embedders can also
//! create private [`VariableStore`] instances.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::Lazy;
use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope};

use crate::error::{RigError, RigResult};
use crate::station::Station;
use crate::utils::clean_name;
use crate::value::Value;

/// Prefix marking a raw variable text as an expression.
pub const EVAL_PREFIX: &str = "$eval:";

/// Abort evaluation beyond this many engine operations.
const MAX_OPERATIONS: u64 = 10_000;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z][a-zA-Z0-9._]*").expect("hardcoded pattern compiles"));

/// True when the text carries the `$eval:` prefix.
pub fn has_eval(text: &str) -> bool {
    text.trim_start().starts_with(EVAL_PREFIX)
}

/// Raw content of a user variable, as entered.
#[derive(Debug, Clone)]
pub enum Raw {
    /// A plain value.
    Literal(Value),
    /// An expression, stored without its `$eval:` prefix.
    Expr(String),
}

impl Raw {
    /// Parses user text: `$eval:` marks an expression, anything else is a
    /// literal with its kind inferred.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.strip_prefix(EVAL_PREFIX) {
            Some(expr) => Raw::Expr(expr.trim().to_string()),
            None => Raw::Literal(Value::infer(trimmed)),
        }
    }

    /// Textual form, with the `$eval:` prefix restored for expressions.
    pub fn display_text(&self) -> String {
        match self {
            Raw::Literal(value) => value.to_string(),
            Raw::Expr(expr) => format!("{EVAL_PREFIX} {expr}"),
        }
    }
}

/// Named user variables plus the station handle expressions read devices
/// through.
#[derive(Default)]
pub struct VariableStore {
    vars: RwLock<HashMap<String, Raw>>,
    station: RwLock<Option<Arc<Station>>>,
}

impl VariableStore {
    /// Creates an empty store with no station attached.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_vars(&self) -> RwLockReadGuard<'_, HashMap<String, Raw>> {
        self.vars.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_vars(&self) -> RwLockWriteGuard<'_, HashMap<String, Raw>> {
        self.vars.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes station elements available to expressions via `device(address)`.
    pub fn attach_station(&self, station: Arc<Station>) {
        let mut slot = self.station.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(station);
    }

    /// Drops the station handle; `device(...)` calls fail afterwards.
    pub fn detach_station(&self) {
        let mut slot = self.station.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    fn station(&self) -> Option<Arc<Station>> {
        self.station
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Creates or replaces a variable. Returns the cleaned name under which
    /// it was stored.
    pub fn set(&self, name: &str, raw: Raw) -> RigResult<String> {
        let cleaned = clean_name(name);
        if cleaned.is_empty() {
            return Err(RigError::Configuration(format!(
                "User variable name '{name}' is empty once cleaned"
            )));
        }
        if let Raw::Expr(expr) = &raw {
            if referenced_names(expr).contains(&cleaned) {
                return Err(RigError::SelfReference(cleaned));
            }
        }
        self.write_vars().insert(cleaned.clone(), raw);
        Ok(cleaned)
    }

    /// Creates or replaces a variable from user text.
    pub fn set_text(&self, name: &str, text: &str) -> RigResult<String> {
        self.set(name, Raw::parse(text))
    }

    /// Creates or replaces a variable with a literal value.
    pub fn set_value(&self, name: &str, value: Value) -> RigResult<String> {
        self.set(name, Raw::Literal(value))
    }

    /// Raw content as entered.
    pub fn raw(&self, name: &str) -> RigResult<Raw> {
        self.read_vars()
            .get(name)
            .cloned()
            .ok_or_else(|| RigError::UnknownUserVariable(name.to_string()))
    }

    /// Evaluated value: literals are returned as stored, expressions are
    /// evaluated, following references to other variables.
    pub fn get(&self, name: &str) -> RigResult<Value> {
        self.resolve(name, &mut Vec::new())
    }

    fn resolve(&self, name: &str, stack: &mut Vec<String>) -> RigResult<Value> {
        if stack.iter().any(|seen| seen == name) {
            return Err(RigError::CircularReference(name.to_string()));
        }
        match self.raw(name)? {
            Raw::Literal(value) => Ok(value),
            Raw::Expr(expr) => {
                stack.push(name.to_string());
                let value = self.eval_with_stack(&expr, stack);
                stack.pop();
                value
            }
        }
    }

    /// Evaluates a standalone expression against the store.
    pub fn eval(&self, expr: &str) -> RigResult<Value> {
        self.eval_with_stack(expr, &mut Vec::new())
    }

    fn eval_with_stack(&self, expr: &str, stack: &mut Vec<String>) -> RigResult<Value> {
        let mut engine = Engine::new();
        engine.on_progress(|count| {
            if count > MAX_OPERATIONS {
                Some("Safety limit exceeded: maximum 10000 operations".into())
            } else {
                None
            }
        });

        if let Some(station) = self.station() {
            engine.register_fn(
                "device",
                move |address: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                    let value = station
                        .variable(address)
                        .and_then(|variable| variable.read())
                        .map_err(|e| {
                            Box::new(EvalAltResult::ErrorRuntime(
                                format!("device('{address}') failed: {e}").into(),
                                Position::NONE,
                            ))
                        })?;
                    value_to_dynamic(&value).map_err(|e| {
                        Box::new(EvalAltResult::ErrorRuntime(e.to_string().into(), Position::NONE))
                    })
                },
            );
        }

        // Every other user variable referenced by the expression becomes a
        // constant in scope, resolved first so chains and cycles surface here.
        let mut scope = Scope::new();
        for name in referenced_names(expr) {
            let known = self.read_vars().contains_key(&name);
            if known {
                let value = self.resolve(&name, stack)?;
                scope.push_constant(name, value_to_dynamic(&value)?);
            }
        }

        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, expr)
            .map_err(|e| match *e {
                // ErrorTerminated displays without its token; surface the
                // token text so the safety-limit message reaches the user.
                EvalAltResult::ErrorTerminated(token, _) => RigError::Eval(token.to_string()),
                other => RigError::Eval(other.to_string()),
            })?;
        dynamic_to_value(result)
    }

    /// Renames a variable, refusing to overwrite an existing one.
    pub fn rename(&self, old: &str, new: &str) -> RigResult<String> {
        let cleaned = clean_name(new);
        if cleaned.is_empty() {
            return Err(RigError::Configuration(format!(
                "User variable name '{new}' is empty once cleaned"
            )));
        }
        let mut vars = self.write_vars();
        if !vars.contains_key(old) {
            return Err(RigError::UnknownUserVariable(old.to_string()));
        }
        if cleaned != old && vars.contains_key(&cleaned) {
            return Err(RigError::UserVariableExists(cleaned));
        }
        if let Some(raw) = vars.remove(old) {
            vars.insert(cleaned.clone(), raw);
        }
        Ok(cleaned)
    }

    /// Deletes a variable.
    pub fn remove(&self, name: &str) -> RigResult<()> {
        match self.write_vars().remove(name) {
            Some(_) => Ok(()),
            None => Err(RigError::UnknownUserVariable(name.to_string())),
        }
    }

    /// Name and raw content of every variable, sorted by name.
    pub fn list(&self) -> Vec<(String, Raw)> {
        let vars = self.read_vars();
        let mut entries: Vec<(String, Raw)> = vars
            .iter()
            .map(|(name, raw)| (name.clone(), raw.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Deletes every variable.
    pub fn clear(&self) {
        self.write_vars().clear();
    }
}

/// Identifiers an expression may be referring to, including the first
/// segment of dotted accesses such as `samples.len`. Text inside string
/// literals is ignored.
fn referenced_names(expr: &str) -> BTreeSet<String> {
    let stripped = strip_string_literals(expr);
    let mut names = BTreeSet::new();
    for token in IDENTIFIER.find_iter(&stripped) {
        let token = token.as_str();
        names.insert(token.to_string());
        if let Some((first, _)) = token.split_once('.') {
            names.insert(first.to_string());
        }
    }
    names
}

/// Blanks out single- and double-quoted literals so their content never
/// counts as an identifier.
fn strip_string_literals(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in expr.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                    out.push(' ');
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                    out.push(' ');
                } else {
                    out.push(c);
                }
            }
        }
    }
    out
}

fn value_to_dynamic(value: &Value) -> RigResult<Dynamic> {
    match value {
        Value::Int(i) => Ok(Dynamic::from(*i)),
        Value::Float(f) => Ok(Dynamic::from(*f)),
        Value::Bool(b) => Ok(Dynamic::from(*b)),
        Value::Str(s) => Ok(Dynamic::from(s.clone())),
        Value::Array(items) => Ok(Dynamic::from(
            items.iter().map(|&x| Dynamic::from(x)).collect::<Vec<Dynamic>>(),
        )),
        Value::Bytes(bytes) => Ok(Dynamic::from(bytes.clone())),
        Value::Table(_) => Err(RigError::Eval(
            "Tables cannot be used in expressions".to_string(),
        )),
    }
}

fn dynamic_to_value(result: Dynamic) -> RigResult<Value> {
    if result.is_unit() {
        return Err(RigError::Eval("Expression produced no value".to_string()));
    }
    if let Ok(int) = result.as_int() {
        return Ok(Value::Int(int));
    }
    if let Ok(float) = result.as_float() {
        return Ok(Value::Float(float));
    }
    if let Ok(flag) = result.as_bool() {
        return Ok(Value::Bool(flag));
    }
    if result.is_string() {
        return result
            .into_string()
            .map(Value::Str)
            .map_err(|t| RigError::Eval(format!("Unsupported result type '{t}'")));
    }
    if result.is_array() {
        let array = result
            .into_array()
            .map_err(|t| RigError::Eval(format!("Unsupported result type '{t}'")))?;
        let mut floats = Vec::with_capacity(array.len());
        for item in array {
            let number = item
                .as_float()
                .or_else(|_| item.as_int().map(|i| i as f64))
                .map_err(|_| RigError::Eval("Array elements must be numbers".to_string()))?;
            floats.push(number);
        }
        return Ok(Value::Array(floats));
    }
    if result.is::<rhai::Blob>() {
        return match result.try_cast::<rhai::Blob>() {
            Some(bytes) => Ok(Value::Bytes(bytes)),
            None => Err(RigError::Eval("Unsupported result type 'blob'".to_string())),
        };
    }
    Err(RigError::Eval(format!(
        "Unsupported result type '{}'",
        result.type_name()
    )))
}

// =============================================================================
// Process-global store
// =============================================================================

/// Default store shared by the CLI and embedders that want a single
/// process-wide namespace.
pub static VARIABLES: Lazy<VariableStore> = Lazy::new(VariableStore::new);

/// Creates or replaces a variable in the global store from user text.
pub fn set_variable(name: &str, text: &str) -> RigResult<String> {
    VARIABLES.set_text(name, text)
}

/// Evaluated value of a global variable.
pub fn get_variable(name: &str) -> RigResult<Value> {
    VARIABLES.get(name)
}

/// Renames a global variable.
pub fn rename_variable(old: &str, new: &str) -> RigResult<String> {
    VARIABLES.rename(old, new)
}

/// Deletes a global variable.
pub fn remove_variable(name: &str) -> RigResult<()> {
    VARIABLES.remove(name)
}

/// Lists the global variables, sorted by name.
pub fn list_variables() -> Vec<(String, Raw)> {
    VARIABLES.list()
}

/// Deletes every global variable.
pub fn clear_variables() {
    VARIABLES.clear()
}
