#![cfg(not(feature = "torch"))]

mod common;

use std::ffi::CStr;

use common::*;
use lantern_tensor::*;

#[test]
fn construction_round_trips_shape_and_kind() {
    clear_err();
    let t = doubles(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    assert_eq!(shape(t), vec![2, 3]);
    assert_eq!(at_scalar_type(t), DOUBLE);
    assert_eq!(at_device(t), -1);
    assert_eq!(at_defined(t), 1);
    assert_eq!(read_doubles(t), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(last_err(), None);
    at_free(t);
}

#[test]
fn new_tensor_is_undefined() {
    clear_err();
    let t = at_new_tensor();
    assert_ne!(t, NULL_HANDLE);
    assert_eq!(at_defined(t), 0);
    assert_eq!(last_err(), None);
    assert_eq!(at_dim(t), 0);
    assert!(last_err().unwrap().contains("undefined tensor"));
    at_free(t);
}

#[test]
fn mismatched_element_size_is_a_runtime_failure() {
    clear_err();
    let data = [0u8; 8];
    let dims = [2i64];
    let t = at_tensor_of_data(data.as_ptr() as *const libc::c_void, dims.as_ptr(), 1, 4, DOUBLE);
    assert_eq!(t, NULL_HANDLE);
    assert_eq!(at_last_err_kind(), 1);
    assert!(last_err().unwrap().contains("element size"));
}

#[test]
fn oversized_shapes_are_rejected() {
    clear_err();
    let dims = [1i64 << 62, 4];
    let t = at_tensor_of_data(std::ptr::null(), dims.as_ptr(), 2, 8, DOUBLE);
    assert_eq!(t, NULL_HANDLE);
    assert_eq!(at_last_err_kind(), 1);
    assert!(last_err().unwrap().contains("too large"));

    let z = atg_zeros(dims.as_ptr(), 2, DOUBLE);
    assert_eq!(z, NULL_HANDLE);
    assert!(last_err().unwrap().contains("too large"));

    let t = doubles(&[1.0], &[1]);
    let mut out = [0f64; 1];
    at_copy_data(t, out.as_mut_ptr() as *mut libc::c_void, usize::MAX / 2, 8);
    assert!(last_err().unwrap().contains("overflow"));
    at_free(t);
}

#[test]
fn negative_indexes_count_from_the_end() {
    clear_err();
    let t = doubles(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    assert_eq!(value_at(t, &[-1, -1]), 6.0);
    assert_eq!(value_at(t, &[0, 1]), 2.0);
    assert_eq!(last_err(), None);
    at_free(t);
}

#[test]
fn partial_index_write_fills_the_sub_tensor() {
    clear_err();
    let t = int64s(&[1, 2, 3, 4], &[2, 2]);
    let idx = [1i64];
    at_set_int64_value_at_indexes(t, idx.as_ptr(), 1, 9);
    assert_eq!(last_err(), None);
    let full = [1i64, 0];
    assert_eq!(at_int64_value_at_indexes(t, full.as_ptr(), 2), 9);
    let _ = at_int64_value_at_indexes(t, idx.as_ptr(), 1);
    assert!(last_err().is_some());
    at_free(t);
}

#[test]
fn get_returns_a_view_freed_independently() {
    clear_err();
    let t = doubles(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let row = at_get(t, 1);
    assert_eq!(shape(row), vec![2]);
    at_fill_double(row, 0.5);
    assert_eq!(last_err(), None);
    at_free(row);
    assert_eq!(read_doubles(t), vec![1.0, 2.0, 0.5, 0.5]);
    at_free(t);
}

#[test]
fn shallow_clone_shares_storage() {
    clear_err();
    let t = doubles(&[1.0, 2.0], &[2]);
    let c = at_shallow_clone(t);
    at_free(t);
    at_fill_double(c, 7.0);
    assert_eq!(read_doubles(c), vec![7.0, 7.0]);
    assert_eq!(last_err(), None);
    at_free(c);
}

#[test]
fn copy_broadcasts_source() {
    clear_err();
    let dst = doubles(&[0.0; 4], &[2, 2]);
    let src = doubles(&[1.0, 2.0], &[2]);
    at_copy_(dst, src);
    assert_eq!(last_err(), None);
    assert_eq!(read_doubles(dst), vec![1.0, 2.0, 1.0, 2.0]);
    let bad = doubles(&[1.0, 2.0, 3.0], &[3]);
    at_copy_(dst, bad);
    assert!(last_err().is_some());
    for t in [dst, src, bad] {
        at_free(t);
    }
}

#[test]
fn to_string_ends_with_type_footer() {
    clear_err();
    let t = doubles(&[1.0, 2.0], &[1, 2]);
    let s = at_to_string(t, 80);
    assert!(!s.is_null());
    let text = unsafe { CStr::from_ptr(s) }.to_str().unwrap().to_string();
    at_free_string(s);
    assert!(text.ends_with("[ CPUDoubleType{1,2} ]"), "{}", text);
    at_free(t);
}

#[test]
fn ops_compose() {
    clear_err();
    let a = doubles(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let b = doubles(&[1.0, 1.0], &[2, 1]);
    let m = atg_matmul(a, b);
    assert_eq!(read_doubles(m), vec![3.0, 7.0]);
    let two = ats_float(2.0);
    let scaled = atg_mul_scalar(m, two);
    let total = atg_sum(scaled);
    assert_eq!(read_doubles(total), vec![20.0]);
    let mean = atg_mean(a);
    assert_eq!(read_doubles(mean), vec![2.5]);
    assert_eq!(last_err(), None);
    ats_free(two);
    for t in [a, b, m, scaled, total, mean] {
        at_free(t);
    }
}

#[test]
fn zeros_and_seeded_rand() {
    clear_err();
    let dims = [3i64];
    let z = atg_zeros(dims.as_ptr(), 1, DOUBLE);
    assert_eq!(read_doubles(z), vec![0.0; 3]);
    at_manual_seed(42);
    let a = atg_rand(dims.as_ptr(), 1, DOUBLE);
    at_manual_seed(42);
    let b = atg_rand(dims.as_ptr(), 1, DOUBLE);
    assert_eq!(read_doubles(a), read_doubles(b));
    assert_eq!(last_err(), None);
    for t in [z, a, b] {
        at_free(t);
    }
}

#[test]
fn runtime_name_is_static() {
    let name = unsafe { CStr::from_ptr(at_runtime_name()) }.to_str().unwrap();
    assert_eq!(name, "cpu");
    assert_eq!(at_runtime_name(), at_runtime_name());
}
