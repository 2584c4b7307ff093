#![cfg(not(feature = "torch"))]

mod common;

use common::*;
use lantern_tensor::*;
use serial_test::serial;

#[test]
#[serial]
fn backward_accumulates_into_leaves() {
    clear_err();
    let x = leaf(&[1.0, 2.0, 3.0], &[3]);
    let y = atg_mul(x, x);
    let loss = atg_sum(y);
    at_backward(loss, 1, 0);
    assert_eq!(last_err(), None);
    let g = at_grad(x);
    assert_eq!(read_doubles(g), vec![2.0, 4.0, 6.0]);

    at_backward(loss, 0, 0);
    let g2 = at_grad(x);
    assert_eq!(read_doubles(g2), vec![4.0, 8.0, 12.0]);
    for t in [x, y, loss, g, g2] {
        at_free(t);
    }
}

#[test]
#[serial]
fn second_backward_through_a_freed_graph_fails() {
    clear_err();
    let x = leaf(&[3.0], &[1]);
    let loss = atg_sum(atg_mul(x, x));
    at_backward(loss, 0, 0);
    assert_eq!(last_err(), None);
    at_backward(loss, 0, 0);
    assert_eq!(at_last_err_kind(), 1);
    assert!(last_err().unwrap().contains("second time"));
    at_free(x);
    at_free(loss);
}

#[test]
#[serial]
fn run_backward_returns_gradients_for_inputs() {
    clear_err();
    let a = leaf(&[1.0, 2.0], &[2]);
    let b = leaf(&[3.0, 4.0], &[2]);
    let loss = atg_sum(atg_mul(a, b));
    let inputs = [a, b];
    let mut outputs = [NULL_HANDLE; 2];
    at_run_backward([loss].as_ptr(), 1, inputs.as_ptr(), 2, outputs.as_mut_ptr(), 0, 0);
    assert_eq!(last_err(), None);
    assert_eq!(read_doubles(outputs[0]), vec![3.0, 4.0]);
    assert_eq!(read_doubles(outputs[1]), vec![1.0, 2.0]);

    // Explicit inputs leave the accumulated gradients alone.
    let ga = at_grad(a);
    assert_eq!(at_defined(ga), 0);
    for t in [a, b, loss, outputs[0], outputs[1], ga] {
        at_free(t);
    }
}

#[test]
#[serial]
fn an_input_listed_twice_gets_its_gradient_twice() {
    clear_err();
    let x = leaf(&[3.0], &[1]);
    let square = atg_mul(x, x);
    let y = atg_sum(square);
    let mut outputs = [NULL_HANDLE; 2];
    at_run_backward([y].as_ptr(), 1, [x, x].as_ptr(), 2, outputs.as_mut_ptr(), 0, 0);
    assert_eq!(last_err(), None);
    assert_eq!(read_doubles(outputs[0]), vec![6.0]);
    assert_eq!(read_doubles(outputs[1]), vec![6.0]);
    assert_ne!(outputs[0], outputs[1]);
    for t in [x, square, y, outputs[0], outputs[1]] {
        at_free(t);
    }
}

#[test]
#[serial]
fn create_graph_allows_second_order_gradients() {
    clear_err();
    let x = leaf(&[2.0], &[1]);
    let cube = atg_sum(atg_mul(atg_mul(x, x), x));
    let mut first = [NULL_HANDLE];
    at_run_backward([cube].as_ptr(), 1, [x].as_ptr(), 1, first.as_mut_ptr(), 1, 1);
    assert_eq!(last_err(), None);
    assert_eq!(read_doubles(first[0]), vec![12.0]);
    assert_eq!(at_requires_grad(first[0]), 1);

    let dx = atg_sum(first[0]);
    let mut second = [NULL_HANDLE];
    at_run_backward([dx].as_ptr(), 1, [x].as_ptr(), 1, second.as_mut_ptr(), 0, 0);
    assert_eq!(last_err(), None);
    assert_eq!(read_doubles(second[0]), vec![12.0]);
    for t in [x, cube, first[0], dx, second[0]] {
        at_free(t);
    }
}

#[test]
#[serial]
fn roots_without_history_are_rejected() {
    clear_err();
    let plain = doubles(&[1.0], &[1]);
    at_backward(plain, 0, 0);
    assert!(last_err().unwrap().contains("does not require grad"));
    at_free(plain);
}

#[test]
#[serial]
fn grad_set_enabled_reports_previous_mode() {
    clear_err();
    assert_eq!(at_grad_set_enabled(0), 1);
    let x = leaf(&[1.0], &[1]);
    let y = atg_mul(x, x);
    assert_eq!(at_requires_grad(y), 0);
    assert_eq!(at_grad_set_enabled(1), 0);
    assert_eq!(at_grad_set_enabled(1), 1);
    at_free(x);
    at_free(y);
}

#[test]
#[serial]
fn in_place_writes_to_leaves_need_recording_off() {
    clear_err();
    let w = leaf(&[1.0, 1.0], &[2]);
    at_fill_double(w, 0.5);
    assert!(last_err().unwrap().contains("in-place operation"));
    assert_eq!(read_doubles(w), vec![1.0, 1.0]);

    let previous = at_grad_set_enabled(0);
    at_fill_double(w, 0.5);
    at_grad_set_enabled(previous);
    assert_eq!(last_err(), None);
    assert_eq!(read_doubles(w), vec![0.5, 0.5]);
    at_free(w);
}
