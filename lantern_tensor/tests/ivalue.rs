#![cfg(not(feature = "torch"))]

mod common;

use std::fs;

use common::*;
use lantern_tensor::*;
use serial_test::serial;

#[test]
#[serial]
fn tuple_of_int_and_double() {
    clear_err();
    let i = ati_int(3);
    let d = ati_double(2.5);
    let tuple = ati_tuple([i, d].as_ptr(), 2);
    assert_eq!(ati_tag(tuple), 3);
    assert_eq!(ati_tuple_length(tuple), 2);

    let mut items = [NULL_HANDLE; 2];
    ati_to_tuple(tuple, items.as_mut_ptr(), 2);
    assert_eq!(last_err(), None);
    assert_eq!(ati_tag(items[0]), 1);
    assert_eq!(ati_to_int(items[0]), 3);
    assert_eq!(ati_to_double(items[1]), 2.5);
    for v in [i, d, tuple, items[0], items[1]] {
        ati_free(v);
    }
    assert_eq!(last_err(), None);
}

#[test]
#[serial]
fn wrong_variant_is_a_tag_mismatch() {
    clear_err();
    let d = ati_double(1.5);
    assert_eq!(ati_to_int(d), 0);
    assert_eq!(at_last_err_kind(), 2);
    assert_eq!(last_err().as_deref(), Some("expected Int value, got Double"));

    assert_eq!(ati_tuple_length(d), 0);
    assert_eq!(at_last_err_kind(), 2);
    clear_err();
    ati_free(d);
}

#[test]
#[serial]
fn to_tuple_requires_an_exact_buffer() {
    clear_err();
    let a = ati_int(1);
    let tuple = ati_tuple([a, a, a].as_ptr(), 3);
    let before = ati_live_values();
    let mut short = [NULL_HANDLE; 2];
    ati_to_tuple(tuple, short.as_mut_ptr(), 2);
    assert_eq!(at_last_err_kind(), 3);
    clear_err();
    assert_eq!(short, [NULL_HANDLE; 2]);
    assert_eq!(ati_live_values(), before);
    ati_free(a);
    ati_free(tuple);
}

#[test]
#[serial]
fn tag_of_a_bad_handle_is_negative() {
    clear_err();
    assert_eq!(ati_tag(NULL_HANDLE), -1);
    assert_eq!(at_last_err_kind(), 3);
    clear_err();
}

#[test]
#[serial]
fn shallow_and_deep_release() {
    clear_err();
    let tensors_before = at_live_tensors();
    let values_before = ati_live_values();

    let a = doubles(&[1.0], &[1]);
    let b = doubles(&[2.0], &[1]);
    let va = ati_tensor(a);
    let vb = ati_tensor(b);
    let shallow = ati_tuple([va, vb].as_ptr(), 2);
    ati_free(shallow);
    assert_eq!(at_live_tensors(), tensors_before + 2);
    assert_eq!(value_at(a, &[0]), 1.0);

    let deep = ati_tuple([va, vb].as_ptr(), 2);
    ati_free(va);
    ati_free(vb);
    ati_free_deep(deep);
    assert_eq!(last_err(), None);
    assert_eq!(at_live_tensors(), tensors_before);
    assert_eq!(ati_live_values(), values_before);

    at_free(a);
    assert_eq!(at_last_err_kind(), 3);
    assert!(last_err().unwrap().contains("stale"));
}

#[test]
#[serial]
fn tensor_values_share_storage() {
    clear_err();
    let t = doubles(&[1.0, 2.0], &[2]);
    let v = ati_tensor(t);
    let view = ati_to_tensor(v);
    at_fill_double(view, 9.0);
    assert_eq!(read_doubles(t), vec![9.0, 9.0]);
    at_free(view);
    ati_free(v);
    at_free(t);
    assert_eq!(last_err(), None);
}

const AFFINE: &str = r#"{
  "name": "affine",
  "inputs": 2,
  "body": {"tuple": [
    {"add": [{"matmul": [{"input": 0}, {"input": 1}]}, {"double": 1.0}]},
    {"numel": {"input": 0}}
  ]}
}"#;

#[test]
#[serial]
fn module_forward_on_values() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("affine.json");
    fs::write(&path, AFFINE).unwrap();
    let file = cstring(&path);
    let m = atm_load(file.as_ptr());
    assert_ne!(m, NULL_HANDLE, "{:?}", last_err());

    let x = doubles(&[1.0, 2.0], &[1, 2]);
    let w = doubles(&[3.0, 4.0], &[2, 1]);
    let args = [ati_tensor(x), ati_tensor(w)];
    let tensors_before = at_live_tensors();
    let out = atm_forward_(m, args.as_ptr(), 2);
    assert_eq!(last_err(), None);
    assert_eq!(ati_tag(out), 3);

    let mut items = [NULL_HANDLE; 2];
    ati_to_tuple(out, items.as_mut_ptr(), 2);
    let y = ati_to_tensor(items[0]);
    assert_eq!(shape(y), vec![1, 1]);
    assert_eq!(read_doubles(y), vec![12.0]);
    assert_eq!(ati_to_int(items[1]), 2);

    at_free(y);
    for v in items {
        ati_free(v);
    }
    ati_free_deep(out);
    assert_eq!(at_live_tensors(), tensors_before);

    // A tensor-only call must produce a tensor.
    let plain = atm_forward(m, [x, w].as_ptr(), 2);
    assert_eq!(plain, NULL_HANDLE);
    assert_eq!(at_last_err_kind(), 2);
    clear_err();

    for v in args {
        ati_free(v);
    }
    for t in [x, w] {
        at_free(t);
    }
    atm_free(m);
    assert_eq!(atm_live_modules(), 0);
    assert_eq!(last_err(), None);
}

#[test]
#[serial]
fn module_arity_is_checked() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("affine.json");
    fs::write(&path, AFFINE).unwrap();
    let file = cstring(&path);
    let m = atm_load(file.as_ptr());
    let x = doubles(&[1.0], &[1, 1]);
    let out = atm_forward(m, [x].as_ptr(), 1);
    assert_eq!(out, NULL_HANDLE);
    assert!(last_err().unwrap().contains("expected 2 argument(s)"));
    at_free(x);
    atm_free(m);
}

#[test]
#[serial]
fn malformed_module_files_fail_to_load() {
    clear_err();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{\"name\": 1}").unwrap();
    let file = cstring(&path);
    assert_eq!(atm_load(file.as_ptr()), NULL_HANDLE);
    assert_eq!(at_last_err_kind(), 1);
    clear_err();
}
