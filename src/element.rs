//! The element tree: modules, variables and actions.
//!
//! A device exposes its capabilities as a tree of elements. [`Module`]s group
//! children, [`Variable`]s carry typed readable and/or writable instrument
//! parameters, and [`Action`]s are triggerable operations. Every element knows
//! its parent, so a dot-joined address like `laser.ch1.power` can be computed
//! from any node and resolved back from the root.
//!
//! Trees are built once from a driver model (see [`crate::driver`]) and are
//! immutable afterwards; all handles are `Arc`s and safe to share across
//! threads. Child lists preserve the driver's declaration order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::driver::{ActionDef, DoFn, ElementDef, ModuleDef, ReadFn, VariableDef, WriteFn};
use crate::error::{RigError, RigResult};
use crate::utils::{clean_name, emphasize};
use crate::value::{Value, ValueKind};

// =============================================================================
// Element kinds and handles
// =============================================================================

/// The three kinds of nodes a device tree can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// A grouping node with named children.
    Module,
    /// A typed instrument parameter.
    Variable,
    /// A triggerable operation.
    Action,
}

impl ElementKind {
    /// Lowercase name used in listings and error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            ElementKind::Module => "module",
            ElementKind::Variable => "variable",
            ElementKind::Action => "action",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shared handle to any node of a device tree.
#[derive(Clone)]
pub enum Element {
    /// Handle to a module.
    Module(Arc<Module>),
    /// Handle to a variable.
    Variable(Arc<Variable>),
    /// Handle to an action.
    Action(Arc<Action>),
}

impl Element {
    /// The kind of the referenced node.
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Module(_) => ElementKind::Module,
            Element::Variable(_) => ElementKind::Variable,
            Element::Action(_) => ElementKind::Action,
        }
    }

    /// The node's own name.
    pub fn name(&self) -> &str {
        match self {
            Element::Module(module) => module.name(),
            Element::Variable(variable) => variable.name(),
            Element::Action(action) => action.name(),
        }
    }

    /// The node's full dot-joined address.
    pub fn address(&self) -> String {
        match self {
            Element::Module(module) => module.address(),
            Element::Variable(variable) => variable.address(),
            Element::Action(action) => action.address(),
        }
    }

    /// Optional help text attached to the node.
    pub fn help(&self) -> Option<&str> {
        match self {
            Element::Module(module) => module.help(),
            Element::Variable(variable) => variable.help(),
            Element::Action(action) => action.help(),
        }
    }

    /// Human-readable summary of the node.
    pub fn describe(&self) -> String {
        match self {
            Element::Module(module) => module.describe(),
            Element::Variable(variable) => variable.describe(),
            Element::Action(action) => action.describe(),
        }
    }

    /// Unwraps a variable handle, or reports what the element actually is.
    pub fn into_variable(self) -> RigResult<Arc<Variable>> {
        match self {
            Element::Variable(variable) => Ok(variable),
            other => Err(RigError::WrongElementKind {
                address: other.address(),
                kind: other.kind(),
                expected: ElementKind::Variable,
            }),
        }
    }

    /// Unwraps an action handle, or reports what the element actually is.
    pub fn into_action(self) -> RigResult<Arc<Action>> {
        match self {
            Element::Action(action) => Ok(action),
            other => Err(RigError::WrongElementKind {
                address: other.address(),
                kind: other.kind(),
                expected: ElementKind::Action,
            }),
        }
    }

    /// Unwraps a module handle, or reports what the element actually is.
    pub fn into_module(self) -> RigResult<Arc<Module>> {
        match self {
            Element::Module(module) => Ok(module),
            other => Err(RigError::WrongElementKind {
                address: other.address(),
                kind: other.kind(),
                expected: ElementKind::Module,
            }),
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element({} '{}')", self.kind(), self.address())
    }
}

/// A timestamped value recorded by a variable access.
#[derive(Debug, Clone)]
pub struct Reading {
    /// The value that was read or written.
    pub value: Value,
    /// When the access happened.
    pub timestamp: DateTime<Utc>,
}

fn join_address(parent: &Weak<Module>, name: &str) -> String {
    match parent.upgrade() {
        Some(module) => format!("{}.{}", module.address(), name),
        None => name.to_string(),
    }
}

// =============================================================================
// Modules
// =============================================================================

#[derive(Default)]
struct Children {
    modules: Vec<Arc<Module>>,
    variables: Vec<Arc<Variable>>,
    actions: Vec<Arc<Action>>,
}

/// A grouping node of the device tree.
///
/// Children are attached while the tree is built from a driver model and
/// never change afterwards. Names are unique across all three child kinds of
/// a module.
pub struct Module {
    name: String,
    help: Option<String>,
    parent: Weak<Module>,
    children: RwLock<Children>,
}

impl Module {
    /// Builds a device tree from a driver model.
    ///
    /// `name` becomes the root module name and therefore the first segment
    /// of every address inside the tree.
    pub fn device_root(
        name: &str,
        help: Option<String>,
        model: Vec<ElementDef>,
    ) -> RigResult<Arc<Self>> {
        let cleaned = clean_name(name);
        if cleaned.is_empty() {
            return Err(RigError::Configuration(format!(
                "device name '{name}' is empty once cleaned"
            )));
        }
        let root = Arc::new(Module {
            name: cleaned,
            help,
            parent: Weak::new(),
            children: RwLock::new(Children::default()),
        });
        Self::attach(&root, model)?;
        Ok(root)
    }

    fn attach(parent: &Arc<Module>, defs: Vec<ElementDef>) -> RigResult<()> {
        for def in defs {
            match def {
                ElementDef::Module(def) => Self::attach_module(parent, def)?,
                ElementDef::Variable(def) => Self::attach_variable(parent, def)?,
                ElementDef::Action(def) => Self::attach_action(parent, def)?,
            }
        }
        Ok(())
    }

    fn check_new_name(parent: &Arc<Module>, raw: &str) -> RigResult<String> {
        let name = clean_name(raw);
        if name.is_empty() {
            return Err(RigError::EmptyElementName {
                module: parent.name.clone(),
            });
        }
        if parent.get(&name).is_some() {
            return Err(RigError::DuplicateElementName {
                module: parent.name.clone(),
                name,
            });
        }
        Ok(name)
    }

    fn attach_module(parent: &Arc<Module>, def: ModuleDef) -> RigResult<()> {
        let name = Self::check_new_name(parent, &def.name)?;
        let module = Arc::new(Module {
            name,
            help: def.help,
            parent: Arc::downgrade(parent),
            children: RwLock::new(Children::default()),
        });
        Self::attach(&module, def.children)?;
        parent.children_mut().modules.push(module);
        Ok(())
    }

    fn attach_variable(parent: &Arc<Module>, def: VariableDef) -> RigResult<()> {
        let name = Self::check_new_name(parent, &def.name)?;
        if def.read.is_none() && def.write.is_none() {
            return Err(RigError::VariableNotOperable {
                address: format!("{}.{name}", parent.address()),
            });
        }
        let (last, _) = watch::channel(None);
        let variable = Arc::new(Variable {
            name,
            kind: def.kind,
            unit: def.unit,
            help: def.help,
            parent: Arc::downgrade(parent),
            read_fn: def.read,
            write_fn: def.write,
            last,
        });
        parent.children_mut().variables.push(variable);
        Ok(())
    }

    fn attach_action(parent: &Arc<Module>, def: ActionDef) -> RigResult<()> {
        let name = Self::check_new_name(parent, &def.name)?;
        let Some(do_fn) = def.do_fn else {
            return Err(RigError::ActionNotOperable {
                address: format!("{}.{name}", parent.address()),
            });
        };
        let action = Arc::new(Action {
            name,
            help: def.help,
            parent: Arc::downgrade(parent),
            do_fn,
        });
        parent.children_mut().actions.push(action);
        Ok(())
    }

    fn children(&self) -> RwLockReadGuard<'_, Children> {
        self.children.read().unwrap_or_else(|e| e.into_inner())
    }

    fn children_mut(&self) -> RwLockWriteGuard<'_, Children> {
        self.children.write().unwrap_or_else(|e| e.into_inner())
    }

    /// The module's own name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional help text.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Full dot-joined address from the tree root to this module.
    pub fn address(&self) -> String {
        join_address(&self.parent, &self.name)
    }

    /// Names of the submodules, in declaration order.
    pub fn list_modules(&self) -> Vec<String> {
        self.children()
            .modules
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    /// Names of the variables, in declaration order.
    pub fn list_variables(&self) -> Vec<String> {
        self.children()
            .variables
            .iter()
            .map(|v| v.name.clone())
            .collect()
    }

    /// Names of the actions, in declaration order.
    pub fn list_actions(&self) -> Vec<String> {
        self.children()
            .actions
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }

    /// All child names: submodules, then variables, then actions.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.list_modules();
        names.extend(self.list_variables());
        names.extend(self.list_actions());
        names
    }

    /// Looks up a submodule by name.
    pub fn module(&self, name: &str) -> RigResult<Arc<Module>> {
        self.children()
            .modules
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| RigError::UnknownChild {
                module: self.name.clone(),
                kind: ElementKind::Module,
                name: name.to_string(),
            })
    }

    /// Looks up a variable by name.
    pub fn variable(&self, name: &str) -> RigResult<Arc<Variable>> {
        self.children()
            .variables
            .iter()
            .find(|v| v.name == name)
            .cloned()
            .ok_or_else(|| RigError::UnknownChild {
                module: self.name.clone(),
                kind: ElementKind::Variable,
                name: name.to_string(),
            })
    }

    /// Looks up an action by name.
    pub fn action(&self, name: &str) -> RigResult<Arc<Action>> {
        self.children()
            .actions
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| RigError::UnknownChild {
                module: self.name.clone(),
                kind: ElementKind::Action,
                name: name.to_string(),
            })
    }

    /// Looks up a direct child of any kind by name.
    pub fn get(&self, name: &str) -> Option<Element> {
        let children = self.children();
        if let Some(module) = children.modules.iter().find(|m| m.name == name) {
            return Some(Element::Module(module.clone()));
        }
        if let Some(variable) = children.variables.iter().find(|v| v.name == name) {
            return Some(Element::Variable(variable.clone()));
        }
        if let Some(action) = children.actions.iter().find(|a| a.name == name) {
            return Some(Element::Action(action.clone()));
        }
        None
    }

    /// Resolves a dotted path relative to this module.
    ///
    /// Every intermediate segment must name a submodule; the final segment
    /// may name any element kind.
    pub fn find(self: &Arc<Self>, path: &str) -> RigResult<Element> {
        let full = || RigError::UnknownAddress(format!("{}.{path}", self.address()));
        let mut current = Element::Module(Arc::clone(self));
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(full());
            }
            let Element::Module(module) = current else {
                return Err(full());
            };
            current = module.get(segment).ok_or_else(full)?;
        }
        Ok(current)
    }

    /// Flat listing of every descendant as `(address, kind)` pairs.
    pub fn structure(&self) -> Vec<(String, ElementKind)> {
        let mut entries = Vec::new();
        self.collect_structure(&mut entries);
        entries
    }

    fn collect_structure(&self, entries: &mut Vec<(String, ElementKind)>) {
        let children = self.children();
        for variable in &children.variables {
            entries.push((variable.address(), ElementKind::Variable));
        }
        for action in &children.actions {
            entries.push((action.address(), ElementKind::Action));
        }
        for module in &children.modules {
            entries.push((module.address(), ElementKind::Module));
            module.collect_structure(entries);
        }
    }

    /// Human-readable summary listing the module's children.
    pub fn describe(&self) -> String {
        let mut display = format!("\n{}\n", emphasize(&format!("Module {}", self.name)));
        if let Some(help) = &self.help {
            display.push_str(&format!("Help: {help}\n"));
        }
        push_name_section(&mut display, "Submodules", &self.list_modules());
        push_name_section(&mut display, "Variables", &self.list_variables());
        push_name_section(&mut display, "Actions", &self.list_actions());
        display
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Module('{}')", self.address())
    }
}

fn push_name_section(display: &mut String, title: &str, names: &[String]) {
    display.push_str(&format!("\n* {title}: "));
    if names.is_empty() {
        display.push_str("None\n");
    } else {
        for name in names {
            display.push_str(&format!("\n  - {name}"));
        }
        display.push('\n');
    }
}

// =============================================================================
// Variables
// =============================================================================

/// A typed instrument parameter.
///
/// A variable carries at least one of a read and a write callable. Every
/// successful access records a timestamped [`Reading`] on a watch channel, so
/// observers can follow the latest known value without polling the hardware
/// themselves.
pub struct Variable {
    name: String,
    kind: ValueKind,
    unit: Option<String>,
    help: Option<String>,
    parent: Weak<Module>,
    read_fn: Option<ReadFn>,
    write_fn: Option<WriteFn>,
    last: watch::Sender<Option<Reading>>,
}

impl Variable {
    /// The variable's own name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared value kind.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Physical unit, when the driver declared one.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Optional help text.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Full dot-joined address from the tree root to this variable.
    pub fn address(&self) -> String {
        join_address(&self.parent, &self.name)
    }

    /// True when a read callable is attached.
    pub fn readable(&self) -> bool {
        self.read_fn.is_some()
    }

    /// True when a write callable is attached.
    pub fn writable(&self) -> bool {
        self.write_fn.is_some()
    }

    /// True for scalar numerical kinds.
    pub fn numerical(&self) -> bool {
        self.kind.is_numerical()
    }

    /// True when the variable can serve as a scan parameter (writable and
    /// numerical).
    pub fn parameter_allowed(&self) -> bool {
        self.writable() && self.numerical()
    }

    /// True when the variable can be polled by a monitor (readable, and of
    /// numerical or array kind).
    pub fn monitorable(&self) -> bool {
        self.readable() && (self.numerical() || self.kind == ValueKind::Array)
    }

    /// Reads the current value from the instrument.
    ///
    /// The driver's value is checked against the declared kind (ints are
    /// accepted for float variables) and recorded with a timestamp.
    pub fn read(&self) -> RigResult<Value> {
        let read_fn = self
            .read_fn
            .as_ref()
            .ok_or_else(|| RigError::NotReadable(self.address()))?;
        let value = read_fn().map_err(|source| RigError::Driver {
            address: self.address(),
            source,
        })?;
        let actual = value.kind();
        let value = value
            .coerce(self.kind)
            .ok_or_else(|| RigError::KindMismatch {
                address: self.address(),
                expected: self.kind,
                actual,
            })?;
        self.record(value.clone());
        Ok(value)
    }

    /// Writes a value to the instrument.
    ///
    /// The value is coerced to the declared kind first; the coerced value is
    /// what the driver sees and what gets recorded.
    pub fn write(&self, value: Value) -> RigResult<()> {
        let write_fn = self
            .write_fn
            .as_ref()
            .ok_or_else(|| RigError::NotWritable(self.address()))?;
        let actual = value.kind();
        let value = value
            .coerce(self.kind)
            .ok_or_else(|| RigError::KindMismatch {
                address: self.address(),
                expected: self.kind,
                actual,
            })?;
        write_fn(value.clone()).map_err(|source| RigError::Driver {
            address: self.address(),
            source,
        })?;
        self.record(value);
        Ok(())
    }

    /// Parses console text against the declared kind, then writes it.
    pub fn write_text(&self, text: &str) -> RigResult<()> {
        let value = Value::parse(self.kind, text)?;
        self.write(value)
    }

    fn record(&self, value: Value) {
        self.last.send_replace(Some(Reading {
            value,
            timestamp: Utc::now(),
        }));
    }

    /// The most recent recorded access, if any.
    pub fn last_reading(&self) -> Option<Reading> {
        self.last.borrow().clone()
    }

    /// Subscribes to recorded accesses.
    pub fn subscribe(&self) -> watch::Receiver<Option<Reading>> {
        self.last.subscribe()
    }

    /// Saves a value of this variable to disk.
    ///
    /// When `path` is a directory the file is named after the variable's
    /// address with a `.txt` extension. When no value is supplied the
    /// variable is read first. Returns the path actually written.
    pub fn save(&self, path: &Path, value: Option<Value>) -> RigResult<PathBuf> {
        if !self.readable() {
            return Err(RigError::NotReadable(self.address()));
        }
        let target = if path.is_dir() {
            path.join(format!("{}.txt", self.address()))
        } else {
            path.to_path_buf()
        };
        let value = match value {
            Some(value) => value,
            None => self.read()?,
        };
        value.write_to(&target)?;
        Ok(target)
    }

    /// Human-readable summary of the variable.
    pub fn describe(&self) -> String {
        let mut display = format!("\n{}\n", emphasize(&format!("Variable {}", self.name)));
        if let Some(help) = &self.help {
            display.push_str(&format!("Help: {help}\n"));
        }
        display.push('\n');
        display.push_str(&format!("Type: {}\n", self.kind));
        display.push_str(if self.readable() {
            "Readable: YES\n"
        } else {
            "Readable: NO\n"
        });
        display.push_str(if self.writable() {
            "Writable: YES\n"
        } else {
            "Writable: NO\n"
        });
        match &self.unit {
            Some(unit) => display.push_str(&format!("Unit: {unit}\n")),
            None => display.push_str("Unit: None\n"),
        }
        display
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variable('{}': {})", self.address(), self.kind)
    }
}

// =============================================================================
// Actions
// =============================================================================

/// A triggerable operation of a device.
pub struct Action {
    name: String,
    help: Option<String>,
    parent: Weak<Module>,
    do_fn: DoFn,
}

impl Action {
    /// The action's own name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional help text.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Full dot-joined address from the tree root to this action.
    pub fn address(&self) -> String {
        join_address(&self.parent, &self.name)
    }

    /// Triggers the operation.
    pub fn execute(&self) -> RigResult<()> {
        (self.do_fn)().map_err(|source| RigError::Driver {
            address: self.address(),
            source,
        })
    }

    /// Human-readable summary of the action.
    pub fn describe(&self) -> String {
        let mut display = format!("\n{}\n", emphasize(&format!("Action {}", self.name)));
        if let Some(help) = &self.help {
            display.push_str(&format!("Help: {help}\n"));
        }
        display.push('\n');
        display
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action('{}')", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn sample_model() -> (Vec<ElementDef>, Arc<Mutex<f64>>, Arc<AtomicU32>) {
        let level = Arc::new(Mutex::new(0.0_f64));
        let resets = Arc::new(AtomicU32::new(0));

        let read_level = level.clone();
        let write_level = level.clone();
        let count_resets = resets.clone();

        let model = vec![
            ElementDef::Variable(
                VariableDef::new("level", ValueKind::Float)
                    .with_unit("V")
                    .with_help("Output level")
                    .with_read(move || Ok(Value::Float(*read_level.lock().unwrap())))
                    .with_write(move |value| {
                        if let Value::Float(v) = value {
                            *write_level.lock().unwrap() = v;
                        }
                        Ok(())
                    }),
            ),
            ElementDef::Module(ModuleDef::new("ch1").with_help("First channel").with_children(
                vec![ElementDef::Variable(
                    VariableDef::new("enabled", ValueKind::Bool)
                        .with_read(|| Ok(Value::Bool(true))),
                )],
            )),
            ElementDef::Action(
                ActionDef::new("reset")
                    .with_help("Back to defaults")
                    .with_do(move || {
                        count_resets.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
            ),
        ];
        (model, level, resets)
    }

    fn sample_tree() -> Arc<Module> {
        let (model, _, _) = sample_model();
        Module::device_root("rig", Some("Test device".into()), model).unwrap()
    }

    #[test]
    fn test_addresses_walk_to_root() {
        let root = sample_tree();
        assert_eq!(root.address(), "rig");
        let enabled = root.find("ch1.enabled").unwrap();
        assert_eq!(enabled.address(), "rig.ch1.enabled");
        assert_eq!(root.module("ch1").unwrap().address(), "rig.ch1");
    }

    #[test]
    fn test_names_are_cleaned() {
        let model = vec![ElementDef::Variable(
            VariableDef::new("motor speed", ValueKind::Float).with_read(|| Ok(Value::Float(1.0))),
        )];
        let root = Module::device_root("my rig", None, model).unwrap();
        assert_eq!(root.name(), "myrig");
        assert_eq!(root.list_variables(), ["motorspeed"]);
    }

    #[test]
    fn test_empty_name_rejected() {
        let model = vec![ElementDef::Action(
            ActionDef::new("...").with_do(|| Ok(())),
        )];
        let err = Module::device_root("rig", None, model).unwrap_err();
        assert!(matches!(err, RigError::EmptyElementName { module } if module == "rig"));
    }

    #[test]
    fn test_duplicate_names_rejected_across_kinds() {
        let model = vec![
            ElementDef::Variable(
                VariableDef::new("status", ValueKind::Str).with_read(|| Ok(Value::Str("ok".into()))),
            ),
            ElementDef::Action(ActionDef::new("status").with_do(|| Ok(()))),
        ];
        let err = Module::device_root("rig", None, model).unwrap_err();
        assert!(
            matches!(err, RigError::DuplicateElementName { ref name, .. } if name == "status"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_variable_requires_a_callable() {
        let model = vec![ElementDef::Variable(VariableDef::new(
            "dead",
            ValueKind::Int,
        ))];
        let err = Module::device_root("rig", None, model).unwrap_err();
        assert!(matches!(err, RigError::VariableNotOperable { address } if address == "rig.dead"));
    }

    #[test]
    fn test_action_requires_do() {
        let model = vec![ElementDef::Action(ActionDef::new("noop"))];
        let err = Module::device_root("rig", None, model).unwrap_err();
        assert!(matches!(err, RigError::ActionNotOperable { address } if address == "rig.noop"));
    }

    #[test]
    fn test_read_write_records_reading() {
        let (model, level, _) = sample_model();
        let root = Module::device_root("rig", None, model).unwrap();
        let variable = root.variable("level").unwrap();

        assert!(variable.last_reading().is_none());
        variable.write(Value::Float(2.5)).unwrap();
        assert_eq!(*level.lock().unwrap(), 2.5);
        assert_eq!(variable.read().unwrap(), Value::Float(2.5));

        let reading = variable.last_reading().unwrap();
        assert_eq!(reading.value, Value::Float(2.5));
    }

    #[test]
    fn test_write_coerces_int_to_float() {
        let (model, level, _) = sample_model();
        let root = Module::device_root("rig", None, model).unwrap();
        root.variable("level").unwrap().write(Value::Int(3)).unwrap();
        assert_eq!(*level.lock().unwrap(), 3.0);
    }

    #[test]
    fn test_write_rejects_kind_mismatch() {
        let root = sample_tree();
        let err = root
            .variable("level")
            .unwrap()
            .write(Value::Str("high".into()))
            .unwrap_err();
        assert!(matches!(
            err,
            RigError::KindMismatch {
                expected: ValueKind::Float,
                actual: ValueKind::Str,
                ..
            }
        ));
    }

    #[test]
    fn test_read_enforces_declared_kind() {
        let model = vec![ElementDef::Variable(
            VariableDef::new("confused", ValueKind::Float)
                .with_read(|| Ok(Value::Str("not a number".into()))),
        )];
        let root = Module::device_root("rig", None, model).unwrap();
        let err = root.variable("confused").unwrap().read().unwrap_err();
        assert!(matches!(err, RigError::KindMismatch { .. }));
    }

    #[test]
    fn test_access_errors() {
        let root = sample_tree();
        let enabled = root.find("ch1.enabled").unwrap().into_variable().unwrap();
        let err = enabled.write(Value::Bool(false)).unwrap_err();
        assert!(matches!(err, RigError::NotWritable(address) if address == "rig.ch1.enabled"));
    }

    #[test]
    fn test_driver_failure_is_wrapped_with_address() {
        let model = vec![ElementDef::Variable(
            VariableDef::new("broken", ValueKind::Float)
                .with_read(|| anyhow::bail!("link down")),
        )];
        let root = Module::device_root("rig", None, model).unwrap();
        let err = root.variable("broken").unwrap().read().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("rig.broken"), "got: {text}");
    }

    #[test]
    fn test_write_text_parses_per_kind() {
        let (model, level, _) = sample_model();
        let root = Module::device_root("rig", None, model).unwrap();
        root.variable("level").unwrap().write_text("1.5").unwrap();
        assert_eq!(*level.lock().unwrap(), 1.5);
        assert!(root.variable("level").unwrap().write_text("abc").is_err());
    }

    #[test]
    fn test_action_executes() {
        let (model, _, resets) = sample_model();
        let root = Module::device_root("rig", None, model).unwrap();
        root.action("reset").unwrap().execute().unwrap();
        root.action("reset").unwrap().execute().unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_find_reports_unknown_addresses() {
        let root = sample_tree();
        let err = root.find("ch1.missing").unwrap_err();
        assert!(matches!(err, RigError::UnknownAddress(addr) if addr == "rig.ch1.missing"));
        // A variable cannot be an intermediate segment.
        assert!(root.find("level.deeper").is_err());
    }

    #[test]
    fn test_listings_preserve_declaration_order() {
        let model = vec![
            ElementDef::Variable(
                VariableDef::new("zeta", ValueKind::Int).with_read(|| Ok(Value::Int(0))),
            ),
            ElementDef::Variable(
                VariableDef::new("alpha", ValueKind::Int).with_read(|| Ok(Value::Int(0))),
            ),
        ];
        let root = Module::device_root("rig", None, model).unwrap();
        assert_eq!(root.list_variables(), ["zeta", "alpha"]);
    }

    #[test]
    fn test_structure_collects_descendants() {
        let root = sample_tree();
        let structure = root.structure();
        assert_eq!(
            structure,
            vec![
                ("rig.level".to_string(), ElementKind::Variable),
                ("rig.reset".to_string(), ElementKind::Action),
                ("rig.ch1".to_string(), ElementKind::Module),
                ("rig.ch1.enabled".to_string(), ElementKind::Variable),
            ]
        );
    }

    #[test]
    fn test_derived_flags() {
        let root = sample_tree();
        let level = root.variable("level").unwrap();
        assert!(level.readable());
        assert!(level.writable());
        assert!(level.numerical());
        assert!(level.parameter_allowed());
        assert!(level.monitorable());

        let enabled = root.find("ch1.enabled").unwrap().into_variable().unwrap();
        assert!(!enabled.writable());
        assert!(!enabled.numerical());
        assert!(!enabled.monitorable());
    }

    #[test]
    fn test_describe_reports_access() {
        let root = sample_tree();
        let text = root.variable("level").unwrap().describe();
        assert!(text.contains("Variable level"));
        assert!(text.contains("Readable: YES"));
        assert!(text.contains("Writable: YES"));
        assert!(text.contains("Unit: V"));

        let text = root.describe();
        assert!(text.contains("Module rig"));
        assert!(text.contains("- ch1"));
        assert!(text.contains("- level"));
        assert!(text.contains("- reset"));
    }

    #[test]
    fn test_save_into_directory_uses_address() {
        let root = sample_tree();
        let dir = tempfile::tempdir().unwrap();
        let variable = root.variable("level").unwrap();
        variable.write(Value::Float(0.75)).unwrap();
        let written = variable.save(dir.path(), None).unwrap();
        assert_eq!(written, dir.path().join("rig.level.txt"));
        assert_eq!(std::fs::read_to_string(written).unwrap(), "0.75");
    }

    #[test]
    fn test_save_requires_readability() {
        let model = vec![ElementDef::Variable(
            VariableDef::new("write_only", ValueKind::Int).with_write(|_| Ok(())),
        )];
        let root = Module::device_root("rig", None, model).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = root
            .variable("write_only")
            .unwrap()
            .save(dir.path(), Some(Value::Int(1)))
            .unwrap_err();
        assert!(matches!(err, RigError::NotReadable(_)));
    }

    #[test]
    fn test_wrong_element_kind_reports_both_kinds() {
        let root = sample_tree();
        let err = root.find("ch1").unwrap().into_variable().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Element rig.ch1 is a module, not a variable"
        );
        let ch1 = root.find("ch1").unwrap().into_module().unwrap();
        assert_eq!(ch1.list_variables(), ["enabled"]);
    }

    #[test]
    fn test_subscribers_see_recorded_accesses() {
        let (model, _, _) = sample_model();
        let root = Module::device_root("rig", None, model).unwrap();
        let variable = root.variable("level").unwrap();

        let mut rx = variable.subscribe();
        assert!(rx.borrow_and_update().is_none());

        variable.write(Value::Float(1.25)).unwrap();
        assert!(rx.has_changed().unwrap());
        let reading = rx.borrow_and_update().clone().unwrap();
        assert_eq!(reading.value, Value::Float(1.25));
    }
}
