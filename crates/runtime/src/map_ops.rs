//! Map operations
//!
//! A map is a 24-byte arena header `{ entries, len, cap }` over 16-byte
//! `{ key, value }` entries, scanned linearly. Growth doubles from an
//! initial capacity of 4. Insertion order is preserved: `set` of an
//! existing key updates in place, `delete` shifts the tail down, and the
//! `key_at`/`val_at` iteration surface walks entries in order. Keys
//! compare as 64-bit values.

use crate::heap::builtin_heap_alloc;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct MapEntry {
    pub key: i64,
    pub value: i64,
}

#[repr(C)]
pub struct Map64 {
    pub entries: *mut MapEntry,
    pub len: u64,
    pub cap: u64,
}

const INITIAL_CAPACITY: u64 = 4;

/// Allocate an empty map header.
///
/// # Safety
/// Requires an initialized arena.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_map_new() -> *mut Map64 {
    unsafe {
        let m = builtin_heap_alloc(std::mem::size_of::<Map64>() as u64) as *mut Map64;
        (*m).entries = std::ptr::null_mut();
        (*m).len = 0;
        (*m).cap = 0;
        m
    }
}

unsafe fn find_index(m: *const Map64, key: i64) -> Option<u64> {
    unsafe {
        for i in 0..(*m).len {
            if (*(*m).entries.add(i as usize)).key == key {
                return Some(i);
            }
        }
        None
    }
}

/// Insert or update a key.
///
/// # Safety
/// `m` must be a map header from `builtin_map_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_map_set(m: *mut Map64, key: i64, value: i64) {
    unsafe {
        if let Some(i) = find_index(m, key) {
            (*(*m).entries.add(i as usize)).value = value;
            return;
        }
        if (*m).len == (*m).cap {
            let new_cap = if (*m).cap == 0 {
                INITIAL_CAPACITY
            } else {
                (*m).cap * 2
            };
            let new_entries =
                builtin_heap_alloc(new_cap * std::mem::size_of::<MapEntry>() as u64)
                    as *mut MapEntry;
            if !(*m).entries.is_null() {
                std::ptr::copy_nonoverlapping((*m).entries, new_entries, (*m).len as usize);
            }
            (*m).entries = new_entries;
            (*m).cap = new_cap;
        }
        *(*m).entries.add((*m).len as usize) = MapEntry { key, value };
        (*m).len += 1;
    }
}

/// Lookup; a missing key returns 0.
///
/// # Safety
/// `m` must be a map header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_map_get(m: *const Map64, key: i64) -> i64 {
    unsafe {
        match find_index(m, key) {
            Some(i) => (*(*m).entries.add(i as usize)).value,
            None => 0,
        }
    }
}

/// # Safety
/// `m` must be a map header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_map_has(m: *const Map64, key: i64) -> u64 {
    unsafe { find_index(m, key).is_some() as u64 }
}

/// Remove a key, shifting later entries down so iteration order stays
/// insertion order.
///
/// # Safety
/// `m` must be a map header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_map_delete(m: *mut Map64, key: i64) {
    unsafe {
        let Some(i) = find_index(m, key) else {
            return;
        };
        for j in i..(*m).len - 1 {
            *(*m).entries.add(j as usize) = *(*m).entries.add(j as usize + 1);
        }
        (*m).len -= 1;
    }
}

/// # Safety
/// `m` must be a map header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_map_len(m: *const Map64) -> u64 {
    unsafe { (*m).len }
}

/// Key of the i-th entry in insertion order; 0 out of bounds.
///
/// # Safety
/// `m` must be a map header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_map_key_at(m: *const Map64, index: i64) -> i64 {
    unsafe {
        if index < 0 || index as u64 >= (*m).len {
            return 0;
        }
        (*(*m).entries.add(index as usize)).key
    }
}

/// Value of the i-th entry in insertion order; 0 out of bounds.
///
/// # Safety
/// `m` must be a map header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn builtin_map_val_at(m: *const Map64, index: i64) -> i64 {
    unsafe {
        if index < 0 || index as u64 >= (*m).len {
            return 0;
        }
        (*(*m).entries.add(index as usize)).value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::test_arena;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_set_get_update() {
        test_arena::reset();
        unsafe {
            let m = builtin_map_new();
            builtin_map_set(m, 1, 10);
            builtin_map_set(m, 2, 20);
            builtin_map_set(m, 1, 11);
            assert_eq!(builtin_map_len(m), 2);
            assert_eq!(builtin_map_get(m, 1), 11);
            assert_eq!(builtin_map_get(m, 2), 20);
        }
    }

    #[test]
    #[serial]
    fn test_missing_key_returns_zero() {
        test_arena::reset();
        unsafe {
            let m = builtin_map_new();
            builtin_map_set(m, 5, 50);
            assert_eq!(builtin_map_get(m, 99), 0);
            assert_eq!(builtin_map_has(m, 99), 0);
            assert_eq!(builtin_map_has(m, 5), 1);
        }
    }

    #[test]
    #[serial]
    fn test_insertion_order_survives_growth_and_delete() {
        test_arena::reset();
        unsafe {
            let m = builtin_map_new();
            for key in [7, 3, 9, 1, 4, 8] {
                builtin_map_set(m, key, key * 100);
            }
            builtin_map_delete(m, 9);
            let keys: Vec<i64> = (0..builtin_map_len(m) as i64)
                .map(|i| builtin_map_key_at(m, i))
                .collect();
            assert_eq!(keys, vec![7, 3, 1, 4, 8]);
            assert_eq!(builtin_map_val_at(m, 1), 300);
            assert_eq!(builtin_map_key_at(m, 50), 0);
        }
    }
}
