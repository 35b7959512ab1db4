//! Mycelial Runtime: the builtin library behind compiled networks
//!
//! Every export is a `builtin_*` function with the C calling convention,
//! called from generated assembly under System V AMD64 with 16-byte stack
//! alignment at call sites. The generated artifact owns the bump arena and
//! its `heap_ptr`/`heap_end` cells; this library only advances them.
//!
//! Value conventions at the ABI boundary:
//! - strings are NUL-terminated byte pointers in the arena; a null pointer
//!   reads as the empty string
//! - vectors are `{ data, len, cap }` headers, elements 8 bytes each
//! - maps are `{ entries, len, cap }` headers over 16-byte key/value
//!   entries, scanned linearly, insertion order preserved

pub mod fmt;
pub mod heap;
pub mod io;
pub mod map_ops;
pub mod string_ops;
pub mod vec_ops;

pub use fmt::builtin_format;
pub use heap::builtin_heap_alloc;
pub use io::{
    builtin_exit, builtin_print, builtin_print_i64, builtin_println, builtin_read_file,
    builtin_report_i64, builtin_report_str,
};
pub use map_ops::{
    builtin_map_delete, builtin_map_get, builtin_map_has, builtin_map_key_at, builtin_map_len,
    builtin_map_new, builtin_map_set, builtin_map_val_at,
};
pub use string_ops::{
    builtin_int_to_string, builtin_string_cmp, builtin_string_concat, builtin_string_eq,
    builtin_string_len,
};
pub use vec_ops::{
    builtin_vec_get, builtin_vec_len, builtin_vec_new, builtin_vec_pop, builtin_vec_push,
    builtin_vec_set, builtin_vec_slice, builtin_vec_sum,
};

/// Exit code for bump-arena exhaustion.
pub const HEAP_EXHAUSTED_EXIT: i32 = 3;

/// Exit code for a full signal queue (used by generated code; documented
/// here with the rest of the error surface).
pub const QUEUE_OVERFLOW_EXIT: i32 = 4;
