//! Name resolution: lexical scopes and references.
//!
//! A [`Scope`] is a frame of variables linked to its parent.  Frames are
//! reference counted: the evaluator holds one per active block/loop/call and
//! a closure keeps its defining frame alive for as long as it exists.
//!
//! A function declared in a frame is stored in that same frame, which makes
//! a reference cycle.  Frames pushed beneath [`Scope::push_tracked`] are
//! recorded in a [`Frames`] set; releasing the set at the end of a run
//! empties them and lets the cycles fall apart.
//!
//! A [`Reference`] is what an expression evaluates to before anyone decides
//! whether it is being read or written.  `x` evaluates to an unresolved
//! [`Reference::Identifier`]; `x.y` to a [`Reference::Member`]; everything
//! else to an already computed [`Reference::Value`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::error::{Result, ScriptError};
use super::value::{Extensions, Value};

// ── Scope ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Frame {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Scope>,
    tracked_by: Option<Frames>,
}

/// Frames created beneath one tracked scope.  Holds them weakly.
#[derive(Clone, Default)]
pub struct Frames(Rc<RefCell<Vec<Weak<Frame>>>>);

impl Frames {
    fn track(&self, frame: &Rc<Frame>) {
        let mut frames = self.0.borrow_mut();
        if frames.len() == frames.capacity() {
            frames.retain(|f| f.strong_count() > 0);
        }
        frames.push(Rc::downgrade(frame));
    }

    /// Frames still alive.
    pub fn live(&self) -> usize {
        self.0.borrow().iter().filter(|f| f.strong_count() > 0).count()
    }

    /// Empty every frame that is still alive.  Closures that outlive this
    /// keep working for their parameters and the globals only.
    pub fn release(&self) {
        let frames = std::mem::take(&mut *self.0.borrow_mut());
        for frame in frames.iter().filter_map(Weak::upgrade) {
            let vars = std::mem::take(&mut *frame.vars.borrow_mut());
            drop(vars);
        }
    }
}

/// One frame of the lexical scope chain.  Clones share the frame.
#[derive(Clone, Default)]
pub struct Scope(Rc<Frame>);

impl Scope {
    /// A root frame with no parent.
    pub fn global() -> Self {
        Self::default()
    }

    /// A new empty frame whose parent is `self`.
    pub fn push(&self) -> Scope {
        let frame = Rc::new(Frame {
            vars: RefCell::default(),
            parent: Some(self.clone()),
            tracked_by: self.0.tracked_by.clone(),
        });
        if let Some(frames) = &frame.tracked_by {
            frames.track(&frame);
        }
        Scope(frame)
    }

    /// Like [`push`](Self::push), but the new frame and every frame later
    /// pushed beneath it are recorded in the returned set.
    pub fn push_tracked(&self) -> (Scope, Frames) {
        let frames = Frames::default();
        let frame = Rc::new(Frame {
            vars: RefCell::default(),
            parent: Some(self.clone()),
            tracked_by: Some(frames.clone()),
        });
        frames.track(&frame);
        (Scope(frame), frames)
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    /// Declare `name` in this frame, initialised to `null`.
    pub fn declare(&self, name: &str) -> Result<()> {
        let mut vars = self.0.vars.borrow_mut();
        if vars.contains_key(name) {
            return Err(ScriptError::runtime(format!(
                "Cannot declare \"{name}\", it already exists."
            )));
        }
        vars.insert(name.to_owned(), Value::Null);
        Ok(())
    }

    /// `true` when `name` is declared in this frame (parents not searched).
    pub fn is_declared_here(&self, name: &str) -> bool {
        self.0.vars.borrow().contains_key(name)
    }

    /// Read `name` from the nearest frame that declares it.
    pub fn get(&self, name: &str) -> Result<Value> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some(v) = scope.0.vars.borrow().get(name) {
                return Ok(v.clone());
            }
            frame = scope.parent();
        }
        Err(ScriptError::runtime(format!(
            "Cannot read from variable. \"{name}\" does not exist."
        )))
    }

    /// Overwrite `name` in the nearest frame that declares it.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some(slot) = scope.0.vars.borrow_mut().get_mut(name) {
                *slot = value;
                return Ok(());
            }
            frame = scope.parent();
        }
        Err(ScriptError::runtime(format!(
            "Cannot write to variable. \"{name}\" does not exist."
        )))
    }

    /// Declare and initialise in one step.
    pub fn define(&self, name: &str, value: Value) -> Result<()> {
        self.declare(name)?;
        self.set(name, value)
    }
}

// ── Reference ─────────────────────────────────────────────────────────────────

/// Result of evaluating an expression, before it is read or written.
#[derive(Clone)]
pub enum Reference {
    /// A bare name, not yet bound to a scope.
    Identifier(String),
    /// A computed, read-only value.
    Value(Value),
    /// A variable slot in a specific scope chain.
    Variable { scope: Scope, name: String },
    /// Member `key` of whatever `parent` reads as.
    Member { parent: Box<Reference>, key: String },
}

impl Reference {
    /// Dotted name used in error messages.
    pub fn full_name(&self) -> String {
        match self {
            Reference::Identifier(name) | Reference::Variable { name, .. } => name.clone(),
            Reference::Value(v) => v.type_name().to_owned(),
            Reference::Member { parent, key } => format!("{}.{key}", parent.full_name()),
        }
    }

    /// Bind an identifier to `scope`; other references are returned as is.
    pub fn resolve(self, scope: &Scope) -> Reference {
        match self {
            Reference::Identifier(name) => Reference::Variable {
                scope: scope.clone(),
                name,
            },
            other => other,
        }
    }

    /// Read a resolved reference.
    pub fn read(&self, extensions: &Extensions) -> Result<Value> {
        match self {
            Reference::Identifier(name) => Err(ScriptError::runtime(format!(
                "Cannot read from unresolved identifier \"{name}\"."
            ))),
            Reference::Value(v) => Ok(v.clone()),
            Reference::Variable { scope, name } => scope.get(name),
            Reference::Member { parent, key } => {
                let owner = parent.read(extensions)?;
                if owner.is_null() {
                    return Err(ScriptError::type_error(format!(
                        "Cannot read member \"{key}\" on null \"{}\".",
                        parent.full_name()
                    )));
                }
                owner.get_member(key, extensions)
            }
        }
    }

    /// Write through a resolved reference.
    pub fn write(&self, value: Value, extensions: &Extensions) -> Result<()> {
        match self {
            Reference::Identifier(name) => Err(ScriptError::runtime(format!(
                "Cannot write to unresolved identifier \"{name}\"."
            ))),
            Reference::Value(v) => Err(ScriptError::type_error(format!(
                "Cannot assign to a {} value.",
                v.type_name()
            ))),
            Reference::Variable { scope, name } => scope.set(name, value),
            Reference::Member { parent, key } => {
                let owner = parent.read(extensions)?;
                if owner.is_null() {
                    return Err(ScriptError::type_error(format!(
                        "Cannot set member \"{key}\" on null \"{}\".",
                        parent.full_name()
                    )));
                }
                owner.set_member(key, value)
            }
        }
    }

    /// Read, resolving a bare identifier against `scope` first.
    pub fn read_or_resolve(&self, scope: &Scope, extensions: &Extensions) -> Result<Value> {
        match self {
            Reference::Identifier(name) => scope.get(name),
            other => other.read(extensions),
        }
    }

    /// Write, resolving a bare identifier against `scope` first.
    pub fn write_or_resolve(&self, scope: &Scope, value: Value, extensions: &Extensions) -> Result<()> {
        match self {
            Reference::Identifier(name) => scope.set(name, value),
            other => other.write(value, extensions),
        }
    }

    /// Read as a condition.  Only booleans are accepted.
    pub fn truthy(&self, scope: &Scope, extensions: &Extensions) -> Result<bool> {
        match self.read_or_resolve(scope, extensions)? {
            Value::Boolean(b) => Ok(b),
            other => Err(ScriptError::type_error(format!(
                "Cannot convert type \"{}\" to Boolean.",
                other.type_name()
            ))),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
