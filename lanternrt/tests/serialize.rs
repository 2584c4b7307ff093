#![cfg(not(feature = "torch"))]

use std::fs;

use lanternrt::{vision, CModule, Error, IValue, Kind, Result, Scalar, Tensor};

#[test]
fn named_round_trip_keeps_order_and_contents() -> Result<()> {
    let dir = tempfile::tempdir().map_err(|e| Error::Runtime(e.to_string()))?;
    let path = dir.path().join("model.lt");
    let w = Tensor::of_data(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
    let steps = Tensor::of_slice(&[10i64])?;
    Tensor::save_multi(&[("weight", &w), ("steps", &steps)], &path)?;

    let loaded = Tensor::load_multi(&path)?;
    let names: Vec<&str> = loaded.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["weight", "steps"]);
    assert_eq!(loaded[0].1.kind()?, Kind::Float);
    assert_eq!(loaded[0].1.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(loaded[1].1.int64_value(&[0])?, 10);

    let mut target = Tensor::zeros(&[2, 2], Kind::Float)?;
    target.set_requires_grad(true)?;
    Tensor::load_multi_into(&mut [("weight", &mut target)], &path)?;
    assert_eq!(target.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn corrupted_archives_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir().map_err(|e| Error::Runtime(e.to_string()))?;
    let path = dir.path().join("t.lt");
    Tensor::of_slice(&[1.0f64, 2.0])?.save(&path)?;
    let text = fs::read_to_string(&path).map_err(|e| Error::Runtime(e.to_string()))?;
    let tampered = text.replacen(&2.0f64.to_bits().to_string(), &3.0f64.to_bits().to_string(), 1);
    assert_ne!(text, tampered);
    fs::write(&path, tampered).map_err(|e| Error::Runtime(e.to_string()))?;
    let err = Tensor::load(&path).unwrap_err();
    assert!(matches!(err, Error::Runtime(ref msg) if msg.contains("checksum")), "{}", err);
    Ok(())
}

#[test]
fn non_finite_values_reload() -> Result<()> {
    let dir = tempfile::tempdir().map_err(|e| Error::Runtime(e.to_string()))?;
    let path = dir.path().join("extremes.lt");
    let t = Tensor::of_slice(&[1.0f64, f64::INFINITY, f64::NEG_INFINITY, f64::NAN])?;
    Tensor::save_multi(&[("a", &t)], &path)?;
    let loaded = Tensor::load_multi(&path)?;
    let values = loaded[0].1.to_vec::<f64>()?;
    assert_eq!(&values[..3], &[1.0, f64::INFINITY, f64::NEG_INFINITY]);
    assert!(values[3].is_nan());
    Ok(())
}

#[test]
fn images_round_trip() -> Result<()> {
    let dir = tempfile::tempdir().map_err(|e| Error::Runtime(e.to_string()))?;
    let path = dir.path().join("pixel.png");
    let img = Tensor::of_data(&[255u8, 0, 0, 0, 255, 0], &[1, 2, 3])?;
    vision::save(&img, &path)?;
    let back = vision::load(&path)?;
    assert_eq!(back.size()?, vec![1, 2, 3]);
    assert_eq!(back.to_vec::<u8>()?, vec![255, 0, 0, 0, 255, 0]);
    let big = vision::resize(&back, 4, 2)?;
    assert_eq!(big.size()?, vec![2, 4, 3]);
    Ok(())
}

const SCALE: &str = r#"{
  "name": "scale",
  "inputs": 2,
  "body": {"tuple": [{"mul": [{"input": 0}, {"input": 1}]}, {"sum": {"input": 0}}]}
}"#;

#[test]
fn modules_take_and_return_call_values() -> Result<()> {
    let dir = tempfile::tempdir().map_err(|e| Error::Runtime(e.to_string()))?;
    let path = dir.path().join("scale.json");
    fs::write(&path, SCALE).map_err(|e| Error::Runtime(e.to_string()))?;
    let m = CModule::load(&path)?;

    let x = Tensor::of_slice(&[1.0f64, 2.0])?;
    let out = m.forward_is(&[IValue::Tensor(x.shallow_clone()?), IValue::Double(3.0)])?;
    let items = out.into_tuple()?;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_tensor()?.to_vec::<f64>()?, vec![3.0, 6.0]);
    assert_eq!(items[1].as_tensor()?.double_value(&[])?, 3.0);

    let err = m.forward_ts(&[&x, &x]).unwrap_err();
    assert!(matches!(err, Error::TagMismatch { expected: "Tensor", actual: "Tuple" }));
    Ok(())
}

#[test]
fn scalars_feed_ops() -> Result<()> {
    let half = Scalar::float(0.5)?;
    let t = Tensor::of_slice(&[2.0f64, 4.0])?.mul_scalar(&half)?;
    assert_eq!(t.to_vec::<f64>()?, vec![1.0, 2.0]);
    assert_eq!(half.to_string(), "0.5");
    Ok(())
}
