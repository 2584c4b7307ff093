#![cfg(not(feature = "torch"))]

mod common;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use common::*;
use lantern_tensor::*;
use libc::c_void;

fn names(list: &[&str]) -> (Vec<CString>, Vec<*const c_char>) {
    let owned: Vec<CString> = list.iter().map(|n| CString::new(*n).unwrap()).collect();
    let ptrs = owned.iter().map(|c| c.as_ptr()).collect();
    (owned, ptrs)
}

#[test]
fn save_multi_then_load_multi_preserves_names_and_contents() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let file = cstring(&dir.path().join("weights.lt"));
    let w = doubles(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let b = int64s(&[7, 8], &[2]);
    let (_keep, ptrs) = names(&["w", "b"]);
    at_save_multi([w, b].as_ptr(), ptrs.as_ptr(), 2, file.as_ptr());
    assert_eq!(last_err(), None);

    let (_keep, reversed) = names(&["b", "w"]);
    let mut slots = [NULL_HANDLE; 2];
    at_load_multi(slots.as_mut_ptr(), reversed.as_ptr(), 2, file.as_ptr());
    assert_eq!(last_err(), None);
    assert_eq!(at_scalar_type(slots[0]), INT64);
    assert_eq!(shape(slots[1]), vec![2, 2]);
    assert_eq!(read_doubles(slots[1]), vec![1.0, 2.0, 3.0, 4.0]);
    for t in [w, b, slots[0], slots[1]] {
        at_free(t);
    }
}

#[test]
fn load_multi_rejects_live_placeholders() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let file = cstring(&dir.path().join("one.lt"));
    let w = doubles(&[1.0], &[1]);
    let (_keep, ptrs) = names(&["w"]);
    at_save_multi([w].as_ptr(), ptrs.as_ptr(), 1, file.as_ptr());

    let mut slots = [w];
    at_load_multi(slots.as_mut_ptr(), ptrs.as_ptr(), 1, file.as_ptr());
    assert_eq!(at_last_err_kind(), 3);
    assert!(last_err().unwrap().contains("null placeholders"));
    assert_eq!(slots[0], w);
    at_free(w);
}

#[test]
fn load_multi_into_existing_tensors_copies_in_place() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let file = cstring(&dir.path().join("p.lt"));
    let saved = doubles(&[5.0, 6.0], &[2]);
    let (_keep, ptrs) = names(&["p"]);
    at_save_multi([saved].as_ptr(), ptrs.as_ptr(), 1, file.as_ptr());

    let target = leaf(&[0.0, 0.0], &[2]);
    at_load_multi_([target].as_ptr(), ptrs.as_ptr(), 1, file.as_ptr());
    assert_eq!(last_err(), None);
    assert_eq!(read_doubles(target), vec![5.0, 6.0]);
    assert_eq!(at_requires_grad(target), 1);
    at_free(saved);
    at_free(target);
}

#[test]
fn missing_name_is_a_runtime_failure() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let file = cstring(&dir.path().join("m.lt"));
    let t = doubles(&[1.0], &[1]);
    let (_keep, ptrs) = names(&["present"]);
    at_save_multi([t].as_ptr(), ptrs.as_ptr(), 1, file.as_ptr());
    let (_keep, missing) = names(&["absent"]);
    let mut slots = [NULL_HANDLE];
    at_load_multi(slots.as_mut_ptr(), missing.as_ptr(), 1, file.as_ptr());
    assert!(last_err().unwrap().contains("no tensor named absent"));
    assert_eq!(slots[0], NULL_HANDLE);
    at_free(t);
}

extern "C" fn collect(data: *mut c_void, name: *const c_char, t: Handle) {
    let seen = unsafe { &mut *(data as *mut Vec<(String, Vec<f64>)>) };
    let name = unsafe { CStr::from_ptr(name) }.to_str().unwrap().to_string();
    seen.push((name, read_doubles(t)));
    at_free(t);
}

#[test]
fn load_callback_streams_entries_in_file_order() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let file = cstring(&dir.path().join("s.lt"));
    let a = doubles(&[1.0], &[1]);
    let b = doubles(&[2.0, 3.0], &[2]);
    let c = doubles(&[4.0], &[1]);
    let (_keep, ptrs) = names(&["z", "a", "m"]);
    at_save_multi([a, b, c].as_ptr(), ptrs.as_ptr(), 3, file.as_ptr());

    let mut seen: Vec<(String, Vec<f64>)> = Vec::new();
    at_load_callback(file.as_ptr(), &mut seen as *mut _ as *mut c_void, Some(collect));
    assert_eq!(last_err(), None);
    assert_eq!(
        seen,
        vec![
            ("z".to_string(), vec![1.0]),
            ("a".to_string(), vec![2.0, 3.0]),
            ("m".to_string(), vec![4.0]),
        ]
    );
    for t in [a, b, c] {
        at_free(t);
    }
}

#[test]
fn single_tensor_save_and_load() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let file = cstring(&dir.path().join("t.lt"));
    let t = int64s(&[1, 2, 3], &[3]);
    at_save(t, file.as_ptr());
    let back = at_load(file.as_ptr());
    assert_eq!(last_err(), None);
    let idx = [2i64];
    assert_eq!(at_int64_value_at_indexes(back, idx.as_ptr(), 1), 3);
    at_free(t);
    at_free(back);
}

#[test]
fn images_are_hwc_uint8() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let file = cstring(&dir.path().join("img.png"));
    let pixels: Vec<u8> = (0..4 * 2 * 3).map(|v| (v * 9) as u8).collect();
    let dims = [4i64, 2, 3];
    let img = at_tensor_of_data(pixels.as_ptr() as *const c_void, dims.as_ptr(), 3, 1, 0);
    assert_eq!(at_save_image(img, file.as_ptr()), 0);
    let loaded = at_load_image(file.as_ptr());
    assert_eq!(shape(loaded), vec![4, 2, 3]);
    assert_eq!(at_scalar_type(loaded), 0);
    let small = at_resize_image(loaded, 1, 2);
    assert_eq!(shape(small), vec![2, 1, 3]);
    assert_eq!(last_err(), None);

    let not_an_image = doubles(&[0.0], &[1]);
    assert_eq!(at_save_image(not_an_image, file.as_ptr()), 1);
    assert!(last_err().is_some());
    for t in [img, loaded, small, not_an_image] {
        at_free(t);
    }
}
