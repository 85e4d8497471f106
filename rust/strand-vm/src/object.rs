//! Object model seam: method lookup, redefinition tracking and class
//! hierarchy queries.
//!
//! The machine only talks to `ObjectModel`. `ClassTable` is the reference
//! implementation used by tests, benchmarks and embedders that do not bring
//! their own.

use crate::builtins;
use crate::vm::LinkedMethod;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use strand_core::values::{Exception, Value};
use tracing::debug;

pub type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, Exception> + Send + Sync;

/// A method implemented in Rust.
#[derive(Clone)]
pub struct NativeMethod {
    pub name: Arc<str>,
    /// Required argument count; `None` accepts any.
    pub arity: Option<usize>,
    func: Arc<NativeFn>,
}

impl NativeMethod {
    pub fn new(
        name: &str,
        arity: Option<usize>,
        func: impl Fn(&Value, &[Value]) -> Result<Value, Exception> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name),
            arity,
            func: Arc::new(func),
        }
    }

    pub fn call(&self, receiver: &Value, args: &[Value]) -> Result<Value, Exception> {
        if let Some(expected) = self.arity {
            if args.len() != expected {
                return Err(Exception::argument_error(format!(
                    "wrong number of arguments (given {}, expected {})",
                    args.len(),
                    expected
                )));
            }
        }
        (self.func)(receiver, args)
    }
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethod")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Method {
    Compiled(Arc<LinkedMethod>),
    Native(NativeMethod),
}

/// What the machine needs from the object model. Implementations are shared
/// read-only between machines on different threads.
pub trait ObjectModel: Send + Sync {
    /// Resolve `selector` for `receiver`, walking its class ancestry.
    fn lookup(&self, receiver: &Value, selector: &str) -> Option<Method>;

    /// Whether a builtin operator has been replaced for `receiver`'s class.
    /// A user `!=` counts as replacing the builtin `!=` derived from `==`.
    fn is_redefined(&self, _receiver: &Value, _selector: &str) -> bool {
        false
    }

    /// Whether `class` is `ancestor` or inherits from it.
    fn is_kind_of(&self, class: &str, ancestor: &str) -> bool {
        class == ancestor
    }
}

#[derive(Debug, Default)]
struct ClassDef {
    superclass: Option<String>,
    methods: HashMap<String, Method>,
}

#[derive(Debug, Default)]
pub struct ClassTable {
    classes: HashMap<String, ClassDef>,
    /// Per class, selectors where a user method shadows a builtin one.
    redefined: HashMap<String, HashSet<String>>,
}

impl ClassTable {
    /// An empty table without even `Object`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding the builtin classes and their native methods.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        builtins::install(&mut table);
        table
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Define `name`, or re-parent it if it already exists. Classes without
    /// an explicit superclass inherit from `Object` when that is defined.
    pub fn define_class(&mut self, name: &str, superclass: Option<&str>) -> &mut Self {
        let superclass = superclass
            .map(str::to_string)
            .or_else(|| (name != "Object" && self.has_class("Object")).then(|| "Object".to_string()));
        self.classes.entry(name.to_string()).or_default().superclass = superclass;
        self
    }

    /// Define a user method. Shadowing a native method marks the selector as
    /// redefined for `class` and its subclasses. So does `!=` on a class with
    /// a native `==`, since `not_equal` sends `!=` first.
    pub fn define_method(&mut self, class: &str, selector: &str, method: Method) -> &mut Self {
        let shadows_builtin = match self.find(class, selector) {
            Some(Method::Native(_)) => true,
            _ => selector == "!=" && matches!(self.find(class, "=="), Some(Method::Native(_))),
        };
        if shadows_builtin {
            debug!("`{}#{}` redefines a builtin", class, selector);
            self.redefined
                .entry(class.to_string())
                .or_default()
                .insert(selector.to_string());
        }
        self.insert(class, selector, method);
        self
    }

    pub fn define_compiled(&mut self, class: &str, selector: &str, method: Arc<LinkedMethod>) -> &mut Self {
        self.define_method(class, selector, Method::Compiled(method))
    }

    pub fn define_native(
        &mut self,
        class: &str,
        selector: &str,
        arity: Option<usize>,
        func: impl Fn(&Value, &[Value]) -> Result<Value, Exception> + Send + Sync + 'static,
    ) -> &mut Self {
        self.define_method(class, selector, Method::Native(NativeMethod::new(selector, arity, func)))
    }

    /// Define `ivar` as a zero-argument reader.
    pub fn define_attr_reader(&mut self, class: &str, ivar: &str) -> &mut Self {
        let name = ivar.to_string();
        self.insert(
            class,
            ivar,
            Method::Native(NativeMethod::new(ivar, Some(0), move |receiver, _| {
                Ok(receiver.ivar(&name).cloned().unwrap_or(Value::Nil))
            })),
        );
        self
    }

    /// Builtin definitions never count as redefinitions.
    pub(crate) fn define_builtin(
        &mut self,
        class: &str,
        selector: &str,
        arity: Option<usize>,
        func: impl Fn(&Value, &[Value]) -> Result<Value, Exception> + Send + Sync + 'static,
    ) -> &mut Self {
        self.insert(class, selector, Method::Native(NativeMethod::new(selector, arity, func)));
        self
    }

    /// `class` followed by its superclasses, nearest first. Undefined classes
    /// are treated as direct subclasses of `Object`.
    pub fn ancestors(&self, class: &str) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        for name in self.lineage(class) {
            if chain.iter().any(|seen| seen == name) {
                break;
            }
            chain.push(name.to_string());
        }
        chain
    }

    /// Borrowing walk up the superclass chain. A cycle can repeat one class
    /// before the walk gives up after `classes.len() + 1` steps.
    fn lineage<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let mut next = Some(class);
        let mut remaining = self.classes.len() + 1;
        std::iter::from_fn(move || {
            let current = next?;
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            next = match self.classes.get(current) {
                Some(def) => def.superclass.as_deref(),
                None if current != "Object" => self.has_class("Object").then_some("Object"),
                None => None,
            };
            Some(current)
        })
    }

    fn find(&self, class: &str, selector: &str) -> Option<&Method> {
        self.lineage(class)
            .find_map(|name| self.classes.get(name)?.methods.get(selector))
    }

    fn insert(&mut self, class: &str, selector: &str, method: Method) {
        if !self.has_class(class) {
            self.define_class(class, None);
        }
        if let Some(def) = self.classes.get_mut(class) {
            def.methods.insert(selector.to_string(), method);
        }
    }
}

impl ObjectModel for ClassTable {
    fn lookup(&self, receiver: &Value, selector: &str) -> Option<Method> {
        self.find(receiver.class_name(), selector).cloned()
    }

    fn is_redefined(&self, receiver: &Value, selector: &str) -> bool {
        if self.redefined.is_empty() {
            return false;
        }
        self.lineage(receiver.class_name())
            .any(|class| self.redefined.get(class).is_some_and(|selectors| selectors.contains(selector)))
    }

    fn is_kind_of(&self, class: &str, ancestor: &str) -> bool {
        self.lineage(class).any(|name| name == ancestor)
    }
}
