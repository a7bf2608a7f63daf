//! Driver models: how devices declare their element trees.
//!
//! A driver publishes its capabilities as a list of [`ElementDef`]s. The
//! station turns the model into an element tree, wiring each declared read,
//! write and do callable into the matching [`crate::element`] node. Defs are
//! assembled with consuming `with_*` builders:
//!
//! ```
//! use labrig::driver::VariableDef;
//! use labrig::value::{Value, ValueKind};
//!
//! let def = VariableDef::new("wavelength", ValueKind::Float)
//!     .with_unit("nm")
//!     .with_read(|| Ok(Value::Float(1550.0)));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::value::{Value, ValueKind};

/// Read callable of a variable.
pub type ReadFn = Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

/// Write callable of a variable.
pub type WriteFn = Arc<dyn Fn(Value) -> anyhow::Result<()> + Send + Sync>;

/// Do callable of an action.
pub type DoFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

// =============================================================================
// Element definitions
// =============================================================================

/// One entry of a driver model.
pub enum ElementDef {
    /// A grouping node with its own children.
    Module(ModuleDef),
    /// A typed instrument parameter.
    Variable(VariableDef),
    /// A triggerable operation.
    Action(ActionDef),
}

impl ElementDef {
    /// The declared (uncleaned) name of the entry.
    pub fn name(&self) -> &str {
        match self {
            ElementDef::Module(def) => &def.name,
            ElementDef::Variable(def) => &def.name,
            ElementDef::Action(def) => &def.name,
        }
    }
}

impl From<ModuleDef> for ElementDef {
    fn from(def: ModuleDef) -> Self {
        ElementDef::Module(def)
    }
}

impl From<VariableDef> for ElementDef {
    fn from(def: VariableDef) -> Self {
        ElementDef::Variable(def)
    }
}

impl From<ActionDef> for ElementDef {
    fn from(def: ActionDef) -> Self {
        ElementDef::Action(def)
    }
}

/// Declaration of a submodule.
pub struct ModuleDef {
    pub(crate) name: String,
    pub(crate) help: Option<String>,
    pub(crate) children: Vec<ElementDef>,
}

impl ModuleDef {
    /// Starts a module declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: None,
            children: Vec::new(),
        }
    }

    /// Attaches help text shown in listings.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Declares the module's children, in presentation order.
    pub fn with_children(mut self, children: Vec<ElementDef>) -> Self {
        self.children = children;
        self
    }
}

/// Declaration of a variable.
pub struct VariableDef {
    pub(crate) name: String,
    pub(crate) kind: ValueKind,
    pub(crate) unit: Option<String>,
    pub(crate) help: Option<String>,
    pub(crate) read: Option<ReadFn>,
    pub(crate) write: Option<WriteFn>,
}

impl VariableDef {
    /// Starts a variable declaration of the given kind.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unit: None,
            help: None,
            read: None,
            write: None,
        }
    }

    /// Attaches a physical unit shown in listings.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attaches help text shown in listings.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attaches the read callable.
    pub fn with_read(
        mut self,
        read: impl Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.read = Some(Arc::new(read));
        self
    }

    /// Attaches the write callable.
    pub fn with_write(
        mut self,
        write: impl Fn(Value) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.write = Some(Arc::new(write));
        self
    }
}

/// Declaration of an action.
pub struct ActionDef {
    pub(crate) name: String,
    pub(crate) help: Option<String>,
    pub(crate) do_fn: Option<DoFn>,
}

impl ActionDef {
    /// Starts an action declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: None,
            do_fn: None,
        }
    }

    /// Attaches help text shown in listings.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attaches the do callable. Required for the tree to build.
    pub fn with_do(mut self, do_fn: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.do_fn = Some(Arc::new(do_fn));
        self
    }
}

// =============================================================================
// The driver trait
// =============================================================================

/// A device driver.
///
/// Implementations own their connection (a [`crate::transport::Transport`],
/// an in-memory simulator, ...) and expose the device through the model
/// returned by [`Driver::driver_model`]. The callables embedded in the model
/// capture whatever shared state they need; they must stay valid for the
/// lifetime of the driver.
pub trait Driver: Send + Sync {
    /// Stable identifier referenced by station configurations.
    fn id(&self) -> &'static str;

    /// Declares the device's element model.
    fn driver_model(&self) -> Vec<ElementDef>;

    /// Releases the underlying connection. The default does nothing.
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Driver('{}')", self.id())
    }
}
