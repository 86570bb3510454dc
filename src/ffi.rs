//! C ABI function exports
//!
//! A thin layer over [`Model`] for hosts that load the kernel as a shared
//! library. Every function takes the opaque context created by
//! `digital_sim_create`; failures are reported through return codes and the
//! last error message, never by unwinding across the boundary.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_ulong};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::slice;

use crate::error::{Error, Result};
use crate::model::Model;

// ============================================================================
// Simulator Context
// ============================================================================

/// Opaque simulator context passed to all FFI functions
pub struct SimContext {
    pub model: Model,
    last_error: Option<String>,
}

impl SimContext {
    pub fn new(json: &str) -> Result<Self> {
        Ok(Self {
            model: Model::from_json(json)?,
            last_error: None,
        })
    }

    /// Map a result to a return code, keeping the error message
    fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => {
                self.last_error = None;
                Some(v)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                None
            }
        }
    }
}

fn error_string(msg: String) -> *mut c_char {
    // Interior NULs cannot cross the boundary
    CString::new(msg.replace('\0', " "))
        .unwrap_or_default()
        .into_raw()
}

/// Run `f` on the context; null contexts and panics map to `fallback`
unsafe fn with_ctx<T>(ctx: *mut SimContext, fallback: T, f: impl FnOnce(&mut SimContext) -> T) -> T {
    if ctx.is_null() {
        return fallback;
    }
    let ctx = &mut *ctx;
    match catch_unwind(AssertUnwindSafe(|| f(ctx))) {
        Ok(v) => v,
        Err(_) => fallback,
    }
}

unsafe fn name_arg<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create a simulator from netlist JSON.
/// Returns null on error, error message written to error_out if provided.
#[no_mangle]
pub unsafe extern "C" fn digital_sim_create(
    json: *const c_char,
    json_len: usize,
    error_out: *mut *mut c_char,
) -> *mut SimContext {
    if json.is_null() {
        return ptr::null_mut();
    }
    let json_slice = slice::from_raw_parts(json as *const u8, json_len);
    let result = match std::str::from_utf8(json_slice) {
        Ok(s) => catch_unwind(|| SimContext::new(s))
            .unwrap_or_else(|_| Err(Error::InvalidNetlist("panic while elaborating netlist".to_string()))),
        Err(e) => Err(Error::InvalidNetlist(format!("invalid UTF-8 in JSON: {}", e))),
    };

    match result {
        Ok(ctx) => Box::into_raw(Box::new(ctx)),
        Err(e) => {
            if !error_out.is_null() {
                *error_out = error_string(e.to_string());
            }
            ptr::null_mut()
        }
    }
}

/// Destroy a simulator; stops its real-time clocks
#[no_mangle]
pub unsafe extern "C" fn digital_sim_destroy(ctx: *mut SimContext) {
    if !ctx.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| drop(Box::from_raw(ctx))));
    }
}

/// Free a string returned by digital_sim functions
#[no_mangle]
pub unsafe extern "C" fn digital_sim_free_error(error: *mut c_char) {
    if !error.is_null() {
        drop(CString::from_raw(error));
    }
}

/// Last error message of a context, or null. Free with digital_sim_free_error.
#[no_mangle]
pub unsafe extern "C" fn digital_sim_last_error(ctx: *mut SimContext) -> *mut c_char {
    with_ctx(ctx, ptr::null_mut(), |ctx| match &ctx.last_error {
        Some(msg) => error_string(msg.clone()),
        None => ptr::null_mut(),
    })
}

/// Returns 0 on success, -1 on error
#[no_mangle]
pub unsafe extern "C" fn digital_sim_init(ctx: *mut SimContext) -> c_int {
    with_ctx(ctx, -1, |ctx| {
        let result = ctx.model.init();
        ctx.record(result).map_or(-1, |_| 0)
    })
}

#[no_mangle]
pub unsafe extern "C" fn digital_sim_close(ctx: *mut SimContext) {
    with_ctx(ctx, (), |ctx| ctx.model.close())
}

// ============================================================================
// Signals
// ============================================================================

/// Drive a named input; high_z != 0 floats it.
/// Returns 0 on success, -1 on error (unknown or driven signal)
#[no_mangle]
pub unsafe extern "C" fn digital_sim_poke(
    ctx: *mut SimContext,
    name: *const c_char,
    value: c_ulong,
    high_z: c_int,
) -> c_int {
    let Some(name) = name_arg(name) else {
        return -1;
    };
    with_ctx(ctx, -1, |ctx| {
        let result = ctx.model.poke(name, value as u64, high_z != 0);
        ctx.record(result).map_or(-1, |_| 0)
    })
}

/// Read a named signal into value_out.
/// Returns 0 if driven, 1 if high-Z, -1 on error
#[no_mangle]
pub unsafe extern "C" fn digital_sim_peek(
    ctx: *mut SimContext,
    name: *const c_char,
    value_out: *mut c_ulong,
) -> c_int {
    let Some(name) = name_arg(name) else {
        return -1;
    };
    with_ctx(ctx, -1, |ctx| {
        let result = ctx.model.peek(name);
        match ctx.record(result) {
            Some((value, high_z)) => {
                if !value_out.is_null() {
                    *value_out = value as c_ulong;
                }
                high_z as c_int
            }
            None => -1,
        }
    })
}

/// Number of nets in the model
#[no_mangle]
pub unsafe extern "C" fn digital_sim_signal_count(ctx: *mut SimContext) -> c_uint {
    with_ctx(ctx, 0, |ctx| ctx.model.signals().len() as c_uint)
}

// ============================================================================
// Stepping
// ============================================================================

/// Returns 0 on success, -1 on error
#[no_mangle]
pub unsafe extern "C" fn digital_sim_step(ctx: *mut SimContext) -> c_int {
    with_ctx(ctx, -1, |ctx| {
        let result = ctx.model.do_step();
        ctx.record(result).map_or(-1, |_| 0)
    })
}

/// Returns 0 on success, -1 on error
#[no_mangle]
pub unsafe extern "C" fn digital_sim_micro_step(ctx: *mut SimContext) -> c_int {
    with_ctx(ctx, -1, |ctx| {
        let result = ctx.model.do_micro_step(true);
        ctx.record(result).map_or(-1, |_| 0)
    })
}

/// Toggle every clock once and stabilize. Returns 0 on success, -1 on error
#[no_mangle]
pub unsafe extern "C" fn digital_sim_clock_step(ctx: *mut SimContext) -> c_int {
    with_ctx(ctx, -1, |ctx| {
        let result = ctx.model.clock_step();
        ctx.record(result).map_or(-1, |_| 0)
    })
}

/// Run until a break fires; cycles written to cycles_out.
/// Returns 0 on success, -1 on error (including timeout)
#[no_mangle]
pub unsafe extern "C" fn digital_sim_run_to_break(ctx: *mut SimContext, cycles_out: *mut c_ulong) -> c_int {
    with_ctx(ctx, -1, |ctx| {
        let result = ctx.model.run_to_break();
        match ctx.record(result) {
            Some(cycles) => {
                if !cycles_out.is_null() {
                    *cycles_out = cycles as c_ulong;
                }
                0
            }
            None => -1,
        }
    })
}

/// Returns 1 if work is pending, 0 if stable, -1 on null context
#[no_mangle]
pub unsafe extern "C" fn digital_sim_needs_update(ctx: *mut SimContext) -> c_int {
    with_ctx(ctx, -1, |ctx| ctx.model.needs_update() as c_int)
}
