//! Calls between the interpreter and host code.
//!
//! `ccallout` and `ccallout2` hand strings to a [`CalloutHost`]; the host
//! may call back into the running program through the
//! [`CallbackContext`] it is given. `callfunction` calls a raw function
//! address with arguments described by a type signature.

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;

use object::Specifier;

use crate::error::{RuntimeError, RuntimeResult};
use crate::interpreter::Interpreter;

/// Host side of `ccallout`.
pub trait CalloutHost {
    /// Handles `ccallout(code, callback, args)`. `None` becomes `om`.
    fn callout(
        &mut self,
        code: i32,
        args: &[Vec<u8>],
        ctx: &mut CallbackContext<'_>,
    ) -> Result<Option<Vec<u8>>, String>;

    /// Handles `ccallout2`, whose strings may contain NUL bytes.
    fn callout_binary(
        &mut self,
        code: i32,
        args: &[Vec<u8>],
        ctx: &mut CallbackContext<'_>,
    ) -> Result<Option<Vec<u8>>, String> {
        self.callout(code, args, ctx)
    }
}

/// The running interpreter and the callback procedure of the current
/// callout.
pub struct CallbackContext<'a> {
    interp: &'a mut Interpreter,
    callback: Specifier,
}

impl CallbackContext<'_> {
    /// Calls the callback with a tuple of `args` and returns its string
    /// result.
    pub fn invoke(&mut self, args: &[&[u8]]) -> Result<Option<Vec<u8>>, String> {
        if self.callback.is_omega() {
            return Err("no callback procedure".into());
        }
        let tuple = Specifier::tuple_of(args.iter().map(Specifier::string).collect());
        let (result, _) = self
            .interp
            .call_value(&self.callback, vec![tuple], Specifier::Omega)
            .map_err(|err| err.to_string())?;
        match result {
            Specifier::Omega => Ok(None),
            other => other
                .as_str_bytes()
                .map(|bytes| Some(bytes.to_vec()))
                .ok_or_else(|| {
                    format!("callback returned {}, expected a string", other.type_name())
                }),
        }
    }
}

impl Interpreter {
    pub(crate) fn callout(
        &mut self,
        code: i32,
        callback: Specifier,
        args: Vec<Vec<u8>>,
        binary: bool,
    ) -> RuntimeResult<Specifier> {
        let mut host = self.callout.take().ok_or(RuntimeError::NoCalloutHost)?;
        log::debug!("callout {code} with {} arguments", args.len());
        let result = {
            let mut ctx = CallbackContext { interp: self, callback };
            if binary {
                host.callout_binary(code, &args, &mut ctx)
            } else {
                host.callout(code, &args, &mut ctx)
            }
        };
        self.callout = Some(host);
        Ok(match result.map_err(RuntimeError::Callout)? {
            Some(bytes) => Specifier::string(bytes),
            None => Specifier::Omega,
        })
    }
}

// ── C adapter ──────────────────────────────────────────────────────

/// `setl2_callout(code, argc, argv)`.
pub type CalloutFn = unsafe extern "C" fn(c_int, c_int, *const *const c_char) -> *const c_char;

thread_local! {
    static ACTIVE: Cell<*mut c_void> = const { Cell::new(ptr::null_mut()) };
    static REPLY: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Restores the previously active context when a callout returns.
struct ActiveGuard(*mut c_void);

impl ActiveGuard {
    fn enter(ctx: &mut CallbackContext<'_>) -> Self {
        let ptr = ctx as *mut CallbackContext<'_> as *mut c_void;
        Self(ACTIVE.with(|active| active.replace(ptr)))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(self.0));
    }
}

/// A [`CalloutHost`] backed by a C function.
///
/// Text callouts pass NUL-terminated strings. Binary callouts pass each
/// argument as a 4-byte little-endian length followed by the bytes, and
/// expect the reply in the same shape. The C side re-enters through
/// [`setl2_callback`].
pub struct CCallout {
    func: CalloutFn,
}

impl CCallout {
    /// # Safety
    /// `func` must accept the arguments described above and return either
    /// null or a pointer that stays valid until it is called again.
    pub unsafe fn new(func: CalloutFn) -> Self {
        Self { func }
    }

    fn call(
        &self,
        code: i32,
        argv: &[*const c_char],
        ctx: &mut CallbackContext<'_>,
    ) -> *const c_char {
        let _guard = ActiveGuard::enter(ctx);
        // SAFETY: guaranteed by the caller of `CCallout::new`.
        unsafe { (self.func)(code, argv.len() as c_int, argv.as_ptr()) }
    }
}

impl CalloutHost for CCallout {
    fn callout(
        &mut self,
        code: i32,
        args: &[Vec<u8>],
        ctx: &mut CallbackContext<'_>,
    ) -> Result<Option<Vec<u8>>, String> {
        let strings = args
            .iter()
            .map(|arg| CString::new(arg.as_slice()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| "callout argument contains a NUL byte".to_string())?;
        let argv: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        let reply = self.call(code, &argv, ctx);
        if reply.is_null() {
            return Ok(None);
        }
        // SAFETY: non-null replies are NUL-terminated strings.
        Ok(Some(unsafe { CStr::from_ptr(reply) }.to_bytes().to_vec()))
    }

    fn callout_binary(
        &mut self,
        code: i32,
        args: &[Vec<u8>],
        ctx: &mut CallbackContext<'_>,
    ) -> Result<Option<Vec<u8>>, String> {
        let buffers: Vec<Vec<u8>> = args.iter().map(|arg| length_prefixed(arg)).collect();
        let argv: Vec<*const c_char> = buffers.iter().map(|b| b.as_ptr().cast()).collect();
        let reply = self.call(code, &argv, ctx);
        if reply.is_null() {
            return Ok(None);
        }
        // SAFETY: non-null binary replies start with a 4-byte length.
        let bytes = unsafe {
            let len = ptr::read_unaligned(reply.cast::<[u8; 4]>());
            std::slice::from_raw_parts(reply.cast::<u8>().add(4), u32::from_le_bytes(len) as usize)
        };
        Ok(Some(bytes.to_vec()))
    }
}

fn length_prefixed(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 4);
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    out
}

/// Re-entry point for C callout hosts: calls the active callout's
/// callback with `argv` as a tuple of strings.
///
/// Returns null for `om` or on failure. The returned string stays valid
/// until the next call.
///
/// # Safety
/// `argv` must point to `argc` NUL-terminated strings. Only valid while a
/// [`CCallout`] is running on this thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn setl2_callback(argc: c_int, argv: *const *const c_char) -> *const c_char {
    let active = ACTIVE.with(Cell::get);
    if active.is_null() {
        return ptr::null();
    }
    let args: Vec<&[u8]> = (0..argc.max(0) as usize)
        // SAFETY: guaranteed by the caller.
        .map(|i| unsafe { CStr::from_ptr(*argv.add(i)) }.to_bytes())
        .collect();
    // SAFETY: `active` was set by `ActiveGuard` from a live context that is
    // blocked in the C call that led here.
    let ctx = unsafe { &mut *active.cast::<CallbackContext<'static>>() };
    match ctx.invoke(&args) {
        Ok(Some(mut bytes)) => {
            bytes.retain(|b| *b != 0);
            bytes.push(0);
            REPLY.with(|reply| {
                let mut reply = reply.borrow_mut();
                *reply = bytes;
                reply.as_ptr().cast()
            })
        }
        Ok(None) => ptr::null(),
        Err(err) => {
            log::warn!("callback failed: {err}");
            ptr::null()
        }
    }
}

// ── callfunction ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CType {
    Void,
    Int,
    Float,
    Double,
    Pointer,
    Str,
}

impl CType {
    fn parse(letter: u8) -> Option<Self> {
        Some(match letter.to_ascii_uppercase() {
            b'V' => CType::Void,
            b'I' => CType::Int,
            b'F' => CType::Float,
            b'D' => CType::Double,
            b'P' => CType::Pointer,
            b'S' => CType::Str,
            _ => return None,
        })
    }

    fn code(self) -> u32 {
        match self {
            CType::Void => 0,
            CType::Int => 1,
            CType::Float => 2,
            CType::Double => 3,
            CType::Pointer => 4,
            CType::Str => 5,
        }
    }
}

/// Dispatch key of a signature: return code × 1000, plus the argument
/// count, plus 300 for float or 400 for double arguments.
fn which_one(ret: CType, args: &[CType]) -> u32 {
    let float = args.contains(&CType::Float) as u32;
    let double = args.contains(&CType::Double) as u32;
    ret.code() * 1000 + args.len() as u32 + 300 * float + 400 * double
}

enum Args {
    Words(Vec<isize>),
    Singles(Vec<f32>),
    Doubles(Vec<f64>),
}

macro_rules! call_as {
    ($address:expr, fn($($t:ty),*) -> $r:ty $(, $arg:expr)*) => {{
        // SAFETY: the program vouches for the address and signature.
        let f = unsafe {
            std::mem::transmute::<usize, unsafe extern "C" fn($($t),*) -> $r>($address)
        };
        unsafe { f($($arg),*) }
    }};
}

macro_rules! by_shape {
    ($address:expr, $args:expr, $r:ty) => {
        match $args {
            Args::Words(w) => match w.as_slice() {
                [] => Some(call_as!($address, fn() -> $r)),
                [a] => Some(call_as!($address, fn(isize) -> $r, *a)),
                [a, b] => Some(call_as!($address, fn(isize, isize) -> $r, *a, *b)),
                [a, b, c] => Some(call_as!($address, fn(isize, isize, isize) -> $r, *a, *b, *c)),
                [a, b, c, d] => {
                    Some(call_as!($address, fn(isize, isize, isize, isize) -> $r, *a, *b, *c, *d))
                }
                _ => None,
            },
            Args::Singles(s) => match s.as_slice() {
                [a] => Some(call_as!($address, fn(f32) -> $r, *a)),
                [a, b] => Some(call_as!($address, fn(f32, f32) -> $r, *a, *b)),
                _ => None,
            },
            Args::Doubles(d) => match d.as_slice() {
                [a] => Some(call_as!($address, fn(f64) -> $r, *a)),
                [a, b] => Some(call_as!($address, fn(f64, f64) -> $r, *a, *b)),
                _ => None,
            },
        }
    };
}

fn bad(reason: impl Into<String>) -> RuntimeError {
    RuntimeError::BadArgument {
        builtin: "callfunction",
        reason: reason.into(),
    }
}

fn number(value: &Specifier) -> Option<f64> {
    match value {
        Specifier::Real(r) => Some(**r),
        other => other.to_long().map(|l| l.to_f64()),
    }
}

/// Calls the C function at `address` as described by `signature`.
///
/// # Safety
/// `address` must be a function with exactly that signature.
pub(crate) unsafe fn call_function(
    signature: &[u8],
    address: usize,
    args: &[Specifier],
) -> RuntimeResult<Specifier> {
    let types = signature
        .iter()
        .map(|b| CType::parse(*b))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            bad(format!("bad type signature `{}`", String::from_utf8_lossy(signature)))
        })?;
    let (&ret, params) = types.split_first().ok_or_else(|| bad("empty type signature"))?;
    if params.len() != args.len() {
        return Err(bad(format!("signature has {} arguments, got {}", params.len(), args.len())));
    }
    if params.contains(&CType::Void) {
        return Err(bad("void argument"));
    }
    let key = which_one(ret, params);
    log::trace!("callfunction {address:#x} which_one {key}");

    let mut strings = Vec::new();
    let prepared = if key % 1000 >= 400 {
        if params.iter().any(|t| *t != CType::Double) {
            return Err(bad("double arguments cannot be mixed with others"));
        }
        Args::Doubles(
            args.iter()
                .map(number)
                .collect::<Option<_>>()
                .ok_or_else(|| bad("expected numbers"))?,
        )
    } else if key % 1000 >= 300 {
        if params.iter().any(|t| *t != CType::Float) {
            return Err(bad("float arguments cannot be mixed with others"));
        }
        Args::Singles(
            args.iter()
                .map(|a| number(a).map(|n| n as f32))
                .collect::<Option<_>>()
                .ok_or_else(|| bad("expected numbers"))?,
        )
    } else {
        let mut words = Vec::with_capacity(args.len());
        for (ty, arg) in params.iter().zip(args) {
            let word = match ty {
                CType::Str => {
                    let bytes = arg.as_str_bytes().ok_or_else(|| bad("expected a string"))?;
                    let s = CString::new(bytes).map_err(|_| bad("string contains a NUL byte"))?;
                    let at = s.as_ptr() as isize;
                    strings.push(s);
                    at
                }
                _ => {
                    let value = arg.to_long().and_then(|l| l.to_i64());
                    value.ok_or_else(|| bad("expected an integer"))? as isize
                }
            };
            words.push(word);
        }
        Args::Words(words)
    };

    let result = match ret {
        CType::Void => by_shape!(address, &prepared, ()).map(|()| Specifier::Omega),
        CType::Int | CType::Pointer => {
            by_shape!(address, &prepared, isize).map(|v| Specifier::from(v as i64))
        }
        CType::Str => by_shape!(address, &prepared, *const c_char).map(|p| {
            if p.is_null() {
                Specifier::Omega
            } else {
                // SAFETY: a string-returning function yields a C string.
                Specifier::string(unsafe { CStr::from_ptr(p) }.to_bytes())
            }
        }),
        CType::Float => by_shape!(address, &prepared, f32).map(|v| Specifier::real(v as f64)),
        CType::Double => by_shape!(address, &prepared, f64).map(Specifier::real),
    };
    drop(strings);
    result.ok_or_else(|| bad(format!("unsupported signature (which_one {key})")))
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn add(a: isize, b: isize) -> isize {
        a + b
    }

    extern "C" fn half(x: f64) -> f64 {
        x / 2.0
    }

    extern "C" fn length(s: *const c_char) -> isize {
        unsafe { CStr::from_ptr(s) }.to_bytes().len() as isize
    }

    #[test]
    fn which_one_composes_return_count_and_class() {
        assert_eq!(which_one(CType::Int, &[CType::Int, CType::Str]), 1002);
        assert_eq!(which_one(CType::Double, &[CType::Double]), 3401);
        assert_eq!(which_one(CType::Void, &[CType::Float, CType::Float]), 302);
    }

    #[test]
    fn calls_integer_functions() {
        let address = add as extern "C" fn(isize, isize) -> isize as usize;
        let args = [Specifier::from(2), Specifier::from(3)];
        let result = unsafe { call_function(b"III", address, &args) };
        assert_eq!(result, Ok(Specifier::from(5)));
    }

    #[test]
    fn calls_double_and_string_functions() {
        let address = half as extern "C" fn(f64) -> f64 as usize;
        let result = unsafe { call_function(b"DD", address, &[Specifier::from(3)]) };
        assert_eq!(result, Ok(Specifier::real(1.5)));

        let address = length as extern "C" fn(*const c_char) -> isize as usize;
        let result = unsafe { call_function(b"IS", address, &[Specifier::from("abcd")]) };
        assert_eq!(result, Ok(Specifier::from(4)));
    }

    #[test]
    fn rejects_mismatched_signatures() {
        let address = add as extern "C" fn(isize, isize) -> isize as usize;
        let args = [Specifier::from(1), Specifier::from(2)];
        let result = unsafe { call_function(b"II", address, &args) };
        assert!(matches!(result, Err(RuntimeError::BadArgument { .. })));
        let result = unsafe { call_function(b"IDI", address, &args) };
        assert!(matches!(result, Err(RuntimeError::BadArgument { .. })));
        let result = unsafe { call_function(b"IX", address, &[Specifier::from(1)]) };
        assert!(matches!(result, Err(RuntimeError::BadArgument { .. })));
    }

    #[test]
    fn binary_arguments_are_length_prefixed() {
        assert_eq!(length_prefixed(b"a\0b"), vec![3, 0, 0, 0, b'a', 0, b'b']);
    }
}
