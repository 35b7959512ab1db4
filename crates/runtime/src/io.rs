//! Host I/O
//!
//! Writes go straight through `libc::write` on stdout; there is no
//! buffering layer, so output order always matches dispatch order.

use crate::heap::arena_cstring;
use crate::string_ops::cstr_bytes;

unsafe fn write_bytes(bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    unsafe {
        libc::write(1, bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

/// Write a C string to stdout. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_print(ptr: *const u8) {
    unsafe { write_bytes(cstr_bytes(ptr)) }
}

/// Write a C string followed by a newline.
///
/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_println(ptr: *const u8) {
    unsafe {
        write_bytes(cstr_bytes(ptr));
        write_bytes(b"\n");
    }
}

/// Write a signed decimal integer.
///
/// # Safety
/// Always safe to call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_print_i64(value: i64) {
    unsafe { write_bytes(value.to_string().as_bytes()) }
}

/// Terminate the process with the given code.
///
/// # Safety
/// Always safe to call; never returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_exit(code: i32) -> ! {
    unsafe { libc::exit(code) }
}

/// Slurp a file into a fresh arena string; null on any I/O error.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_read_file(path: *const u8) -> *mut u8 {
    unsafe {
        let path = String::from_utf8_lossy(cstr_bytes(path)).into_owned();
        match std::fs::read(&path) {
            Ok(content) => arena_cstring(&content),
            Err(_) => std::ptr::null_mut(),
        }
    }
}

/// `report name: value` surface for compiled networks: `name: value\n`.
///
/// # Safety
/// `name` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_report_i64(name: *const u8, value: i64) {
    unsafe {
        write_bytes(cstr_bytes(name));
        write_bytes(b": ");
        write_bytes(value.to_string().as_bytes());
        write_bytes(b"\n");
    }
}

/// String form of `report`.
///
/// # Safety
/// Both pointers must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_report_str(name: *const u8, value: *const u8) {
    unsafe {
        write_bytes(cstr_bytes(name));
        write_bytes(b": ");
        write_bytes(cstr_bytes(value));
        write_bytes(b"\n");
    }
}
