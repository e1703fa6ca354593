// src/scripting/capability.rs — Capability table
//
// Every function a plugin (or the host) binds into the script namespace is
// recorded here. Slots are generation-tagged: revoking an owner's bindings
// bumps the slot generation, so any handle or script closure still pointing
// at the slot gets `Revoked` instead of calling into unloaded code.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// Owner recorded for capabilities bound by the host itself.
pub const HOST_OWNER: &str = "host";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Unknown capability '{0}'")]
    Unknown(String),

    #[error("Capability '{name}' was revoked")]
    Revoked { name: String },

    #[error("Capability '{name}' is already bound by '{owner}'")]
    AlreadyBound { name: String, owner: String },

    #[error("Invalid capability name '{0}'")]
    InvalidName(String),

    #[error("Capability '{name}' failed with status {status}")]
    Failed { name: String, status: i32 },

    #[error("Capability '{name}' panicked")]
    Panicked { name: String },

    #[error("{0}")]
    Rejected(String),
}

/// Something the script namespace can call: integers in, one integer out.
pub trait NativeCallable: Send + Sync {
    fn call(&self, args: &[i64]) -> Result<i64, CapabilityError>;
}

impl<F> NativeCallable for F
where
    F: Fn(&[i64]) -> Result<i64, CapabilityError> + Send + Sync,
{
    fn call(&self, args: &[i64]) -> Result<i64, CapabilityError> {
        self(args)
    }
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// A capability name, optionally inside a namespace (`ns.name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityName {
    pub namespace: Option<String>,
    pub name: String,
}

impl CapabilityName {
    pub fn global(name: &str) -> Result<Self, CapabilityError> {
        validate_ident(name)?;
        Ok(Self {
            namespace: None,
            name: name.to_string(),
        })
    }

    pub fn namespaced(namespace: &str, name: &str) -> Result<Self, CapabilityError> {
        validate_ident(namespace)?;
        validate_ident(name)?;
        Ok(Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        })
    }

    /// Parse `name`, `ns.name` or `ns::name`.
    pub fn parse(qualified: &str) -> Result<Self, CapabilityError> {
        let split = qualified
            .split_once("::")
            .or_else(|| qualified.split_once('.'));
        match split {
            Some((ns, name)) => Self::namespaced(ns, name),
            None => Self::global(qualified),
        }
    }
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Names must be usable as script identifiers.
fn validate_ident(s: &str) -> Result<(), CapabilityError> {
    let mut chars = s.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CapabilityError::InvalidName(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Stable reference to a table slot at a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityHandle {
    index: usize,
    generation: u32,
}

struct Slot {
    name: CapabilityName,
    generation: u32,
    entry: Option<Entry>,
}

struct Entry {
    owner: String,
    callable: Arc<dyn NativeCallable>,
}

#[derive(Default)]
struct TableInner {
    slots: Vec<Slot>,
    index: HashMap<CapabilityName, usize>,
}

#[derive(Default)]
pub struct CapabilityTable {
    inner: RwLock<TableInner>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `callable` under `name` for `owner`.
    ///
    /// Rebinding a live name is allowed for the same owner (the callable is
    /// replaced, the handle stays valid) and refused for anyone else.
    pub fn insert(
        &self,
        name: CapabilityName,
        owner: &str,
        callable: Arc<dyn NativeCallable>,
    ) -> Result<CapabilityHandle, CapabilityError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(&index) = inner.index.get(&name) {
            let slot = &mut inner.slots[index];
            if let Some(entry) = &slot.entry {
                if entry.owner != owner {
                    return Err(CapabilityError::AlreadyBound {
                        name: name.to_string(),
                        owner: entry.owner.clone(),
                    });
                }
            }
            slot.entry = Some(Entry {
                owner: owner.to_string(),
                callable,
            });
            return Ok(CapabilityHandle {
                index,
                generation: slot.generation,
            });
        }

        let index = inner.slots.len();
        inner.slots.push(Slot {
            name: name.clone(),
            generation: 0,
            entry: Some(Entry {
                owner: owner.to_string(),
                callable,
            }),
        });
        inner.index.insert(name, index);
        Ok(CapabilityHandle {
            index,
            generation: 0,
        })
    }

    /// Look a name up once; the handle is then used for every call.
    pub fn resolve(&self, name: &CapabilityName) -> Result<CapabilityHandle, CapabilityError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .index
            .get(name)
            .and_then(|&index| {
                let slot = &inner.slots[index];
                slot.entry.as_ref().map(|_| CapabilityHandle {
                    index,
                    generation: slot.generation,
                })
            })
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))
    }

    /// Invoke through a handle. The table lock is released before the call
    /// so the callee may itself call other capabilities.
    pub fn invoke(&self, handle: CapabilityHandle, args: &[i64]) -> Result<i64, CapabilityError> {
        let (name, callable) = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            let slot = inner
                .slots
                .get(handle.index)
                .ok_or_else(|| CapabilityError::Unknown(format!("#{}", handle.index)))?;
            match &slot.entry {
                Some(entry) if slot.generation == handle.generation => {
                    (slot.name.clone(), entry.callable.clone())
                }
                _ => {
                    return Err(CapabilityError::Revoked {
                        name: slot.name.to_string(),
                    })
                }
            }
        };

        match catch_unwind(AssertUnwindSafe(|| callable.call(args))) {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Panicked {
                name: name.to_string(),
            }),
        }
    }

    /// Resolve and invoke in one step.
    pub fn call(&self, name: &CapabilityName, args: &[i64]) -> Result<i64, CapabilityError> {
        let handle = self.resolve(name)?;
        self.invoke(handle, args)
    }

    /// Revoke every live binding owned by `owner`. Returns the revoked names.
    pub fn revoke_owner(&self, owner: &str) -> Vec<CapabilityName> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut revoked = Vec::new();
        for slot in inner.slots.iter_mut() {
            let owned = slot.entry.as_ref().is_some_and(|e| e.owner == owner);
            if owned {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                revoked.push(slot.name.clone());
            }
        }
        if !revoked.is_empty() {
            tracing::debug!("Revoked {} capabilities owned by '{}'", revoked.len(), owner);
        }
        revoked
    }

    /// Owner of a live binding.
    pub fn owner_of(&self, name: &CapabilityName) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let index = *inner.index.get(name)?;
        inner.slots[index].entry.as_ref().map(|e| e.owner.clone())
    }

    /// Names of all live bindings, sorted.
    pub fn names(&self) -> Vec<CapabilityName> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<_> = inner
            .slots
            .iter()
            .filter(|s| s.entry.is_some())
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("live", &self.len())
            .finish()
    }
}
