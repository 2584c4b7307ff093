#![cfg(not(feature = "torch"))]

mod common;

use common::*;
use lantern_tensor::*;
use serial_test::serial;

fn counts() -> [i64; 4] {
    [at_live_tensors(), ats_live_scalars(), ato_live_optimizers(), ati_live_values()]
}

#[test]
#[serial]
fn training_loop_releases_everything() {
    clear_err();
    let baseline = counts();
    let w = leaf(&[0.5, -0.5], &[2, 1]);
    let x = doubles(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let opt = ato_sgd(0.01, 0.9, 0.0, 0.0, 0);
    ato_add_parameters(opt, [w].as_ptr(), 1);
    let half = ats_float(0.5);

    for _ in 0..5 {
        ato_zero_grad(opt);
        let y = atg_matmul(x, w);
        let scaled = atg_mul_scalar(y, half);
        let loss = atg_mean(scaled);
        at_backward(loss, 0, 0);
        ato_step(opt);
        for t in [y, scaled, loss] {
            at_free(t);
        }
    }
    assert_eq!(last_err(), None);

    ats_free(half);
    ato_free(opt);
    at_free(x);
    at_free(w);
    assert_eq!(counts(), baseline);
}

#[test]
#[serial]
fn failed_calls_do_not_leak() {
    clear_err();
    let baseline = counts();
    let a = doubles(&[1.0, 2.0, 3.0], &[3]);
    let b = doubles(&[1.0, 2.0], &[2]);
    assert_eq!(atg_add(a, b), NULL_HANDLE);
    assert_eq!(atg_matmul(a, b), NULL_HANDLE);
    assert_eq!(at_get(a, 7), NULL_HANDLE);
    assert!(last_err().unwrap().contains("out of bounds"));
    let empty = ati_tuple(std::ptr::null(), 0);
    let mut none: [Handle; 0] = [];
    ati_to_tuple(empty, none.as_mut_ptr(), 0);
    assert_eq!(last_err(), None);
    assert_eq!(atg_sum(NULL_HANDLE), NULL_HANDLE);
    clear_err();
    ati_free(empty);
    at_free(a);
    at_free(b);
    assert_eq!(counts(), baseline);
}

#[test]
#[serial]
fn scalars_round_trip_through_handles() {
    clear_err();
    let i = ats_int(42);
    let f = ats_float(0.25);
    assert_eq!(ats_to_int(i), 42);
    assert_eq!(ats_to_float(f), 0.25);
    assert_eq!(ats_to_float(i), 42.0);
    let rendered = ats_to_string(f);
    let text = unsafe { std::ffi::CStr::from_ptr(rendered) }.to_str().unwrap().to_string();
    at_free_string(rendered);
    assert_eq!(text, "0.25");
    ats_free(i);
    ats_free(f);
    ats_free(f);
    assert_eq!(at_last_err_kind(), 3);
    clear_err();
}
