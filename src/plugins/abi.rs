// src/plugins/abi.rs — Native plugin ABI
//
// Everything a plugin library sees of the host. Plugins never link against
// the scripting engine; they get a `HostContext` (C layout) whose function
// pointers bind native functions into the script namespace and call
// capabilities other plugins have bound.
//
// A plugin exports, with the C calling convention:
//
//     activate(ctx: *const HostContext) -> i32     (required, 0 = success)
//     deactivate(ctx: *const HostContext) -> i32   (optional)

use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;

use crate::scripting::capability::{CapabilityError, NativeCallable};

pub const ABI_VERSION: u32 = 1;

pub const ACTIVATE_SYMBOL: &str = "activate";
pub const DEACTIVATE_SYMBOL: &str = "deactivate";

pub const STATUS_OK: i32 = 0;
pub const STATUS_ERROR: i32 = 1;
pub const STATUS_INVALID_ARGUMENT: i32 = 2;
pub const STATUS_UNKNOWN_CAPABILITY: i32 = 3;
pub const STATUS_ALREADY_BOUND: i32 = 4;
pub const STATUS_SEALED: i32 = 5;
pub const STATUS_CAPABILITY_FAILED: i32 = 6;

/// Borrowed UTF-8 string crossing the ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StrRef {
    pub ptr: *const u8,
    pub len: usize,
}

impl StrRef {
    pub fn new(s: &str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// # Safety
    ///
    /// `ptr` must be valid for `len` bytes for the lifetime `'a`.
    pub unsafe fn as_str<'a>(&self) -> Option<&'a str> {
        if self.ptr.is_null() {
            return None;
        }
        let bytes = std::slice::from_raw_parts(self.ptr, self.len);
        std::str::from_utf8(bytes).ok()
    }
}

/// A native capability: `argc` integers in, one integer written to `out`.
/// Returns `STATUS_OK` on success.
pub type NativeFn = unsafe extern "C" fn(args: *const i64, argc: usize, out: *mut i64) -> i32;

/// Signature shared by `activate` and `deactivate`.
pub type EntryPointFn = unsafe extern "C" fn(ctx: *const HostContext) -> i32;

pub type BindFn = unsafe extern "C" fn(user_data: *mut c_void, name: StrRef, func: NativeFn) -> i32;

pub type BindNamespacedFn =
    unsafe extern "C" fn(user_data: *mut c_void, ns: StrRef, name: StrRef, func: NativeFn) -> i32;

pub type CallFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    qualified: StrRef,
    args: *const i64,
    argc: usize,
    out: *mut i64,
) -> i32;

/// The capability context handed to `activate` / `deactivate`.
///
/// Only the host constructs one; plugins use the methods below.
#[repr(C)]
pub struct HostContext {
    abi_version: u32,
    user_data: *mut c_void,
    bind: BindFn,
    bind_namespaced: BindNamespacedFn,
    call: CallFn,
}

impl HostContext {
    pub(crate) fn new(
        user_data: *mut c_void,
        bind: BindFn,
        bind_namespaced: BindNamespacedFn,
        call: CallFn,
    ) -> Self {
        Self {
            abi_version: ABI_VERSION,
            user_data,
            bind,
            bind_namespaced,
            call,
        }
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    /// Bind `func` as a global script function.
    pub fn bind(&self, name: &str, func: NativeFn) -> i32 {
        // SAFETY: the host built this context; `user_data` matches its callbacks.
        unsafe { (self.bind)(self.user_data, StrRef::new(name), func) }
    }

    /// Bind `func` as `ns::name` in scripts (`ns.name` for `call`).
    pub fn bind_namespaced(&self, ns: &str, name: &str, func: NativeFn) -> i32 {
        // SAFETY: as in `bind`.
        unsafe {
            (self.bind_namespaced)(self.user_data, StrRef::new(ns), StrRef::new(name), func)
        }
    }

    /// Call a capability bound by the host or an earlier plugin.
    pub fn call(&self, qualified: &str, args: &[i64]) -> Result<i64, i32> {
        let mut out = 0i64;
        // SAFETY: as in `bind`; `args` and `out` outlive the call.
        let status = unsafe {
            (self.call)(
                self.user_data,
                StrRef::new(qualified),
                args.as_ptr(),
                args.len(),
                &mut out,
            )
        };
        if status == STATUS_OK {
            Ok(out)
        } else {
            Err(status)
        }
    }
}

/// Read the argument slice a `NativeFn` receives.
///
/// # Safety
///
/// `args` must point to `argc` readable integers, or `argc` must be zero.
pub unsafe fn args_slice<'a>(args: *const i64, argc: usize) -> &'a [i64] {
    if args.is_null() || argc == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(args, argc)
    }
}

/// A `NativeFn` exported by a plugin, callable from the capability table.
///
/// `pin` keeps the plugin's library and context alive, so a call that is in
/// flight when the plugin unloads still runs against mapped code.
pub(crate) struct ForeignFn {
    pub(crate) name: String,
    pub(crate) func: NativeFn,
    pub(crate) pin: Arc<dyn Any + Send + Sync>,
}

impl NativeCallable for ForeignFn {
    fn call(&self, args: &[i64]) -> Result<i64, CapabilityError> {
        let mut out = 0i64;
        // SAFETY: `pin` holds the library that exported `func`.
        let status = unsafe { (self.func)(args.as_ptr(), args.len(), &mut out) };
        if status == STATUS_OK {
            Ok(out)
        } else {
            Err(CapabilityError::Failed {
                name: self.name.clone(),
                status,
            })
        }
    }
}

/// Map a capability failure onto an ABI status code.
pub(crate) fn status_for(err: &CapabilityError) -> i32 {
    match err {
        CapabilityError::Unknown(_) | CapabilityError::Revoked { .. } => STATUS_UNKNOWN_CAPABILITY,
        CapabilityError::AlreadyBound { .. } => STATUS_ALREADY_BOUND,
        CapabilityError::InvalidName(_) => STATUS_INVALID_ARGUMENT,
        CapabilityError::Failed { .. } | CapabilityError::Panicked { .. } => {
            STATUS_CAPABILITY_FAILED
        }
        CapabilityError::Rejected(_) => STATUS_ERROR,
    }
}
