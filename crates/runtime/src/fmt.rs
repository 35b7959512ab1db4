//! `format` interpolation
//!
//! Fixed-arity ABI: the format string plus five pre-stringified slots,
//! unused slots null. The compiler converts integer arguments through
//! `builtin_int_to_string` before the call, so every slot is a string
//! here. Each `{}` consumes the next slot; placeholders beyond the last
//! argument are kept verbatim.

use crate::heap::arena_cstring;
use crate::string_ops::cstr_bytes;

/// Interpolate `{}` placeholders into a fresh arena string.
///
/// # Safety
/// All pointers must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_format(
    fmt: *const u8,
    a0: *const u8,
    a1: *const u8,
    a2: *const u8,
    a3: *const u8,
    a4: *const u8,
) -> *mut u8 {
    unsafe {
        let fmt = cstr_bytes(fmt);
        let args = [a0, a1, a2, a3, a4];
        let mut next = 0usize;
        let mut out: Vec<u8> = Vec::with_capacity(fmt.len());

        let mut i = 0usize;
        while i < fmt.len() {
            if fmt[i] == b'{' && i + 1 < fmt.len() && fmt[i + 1] == b'}' {
                if next < args.len() && !args[next].is_null() {
                    out.extend_from_slice(cstr_bytes(args[next]));
                    next += 1;
                } else {
                    out.extend_from_slice(b"{}");
                }
                i += 2;
            } else {
                out.push(fmt[i]);
                i += 1;
            }
        }
        arena_cstring(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{arena_cstring as cstr, test_arena};
    use serial_test::serial;
    use std::ptr;

    #[test]
    #[serial]
    fn test_interpolation() {
        test_arena::reset();
        unsafe {
            let fmt = cstr(b"Hello, {}!");
            let name = cstr(b"World");
            let out = builtin_format(
                fmt,
                name,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                ptr::null(),
            );
            assert_eq!(cstr_bytes(out), b"Hello, World!");
        }
    }

    #[test]
    #[serial]
    fn test_extra_placeholders_kept() {
        test_arena::reset();
        unsafe {
            let fmt = cstr(b"{} and {}");
            let a = cstr(b"one");
            let out = builtin_format(
                fmt,
                a,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                ptr::null(),
            );
            assert_eq!(cstr_bytes(out), b"one and {}");
        }
    }

    #[test]
    #[serial]
    fn test_multiple_args() {
        test_arena::reset();
        unsafe {
            let fmt = cstr(b"{}+{}={}");
            let out = builtin_format(
                fmt,
                cstr(b"2"),
                cstr(b"3"),
                cstr(b"5"),
                ptr::null(),
                ptr::null(),
            );
            assert_eq!(cstr_bytes(out), b"2+3=5");
        }
    }
}
