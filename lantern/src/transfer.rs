//! Linear probe over precomputed features.
//!
//! The archive holds `train_images`, `train_labels`, `test_images` and
//! `test_labels`. Images are `[n, ...]` floating point tensors, labels are
//! `[n]` `Int64` class ids. With a backbone module the images are mapped to
//! features once, without recording history; otherwise the images are the
//! features. A linear layer is then fit to one-hot targets with a squared
//! error loss.

use std::collections::HashMap;
use std::path::Path;

use lanternrt::{no_grad, CModule, Kind, Scalar, Tensor};

use crate::config::TrainConfig;
use crate::error::{CliError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub classes: usize,
    pub features: usize,
    pub final_loss: f64,
    pub test_accuracy: f64,
}

struct Split {
    features: Tensor,
    labels: Vec<i64>,
}

fn take(entries: &mut HashMap<String, Tensor>, name: &str) -> Result<Tensor> {
    entries.remove(name).ok_or_else(|| CliError::Missing(name.to_string()))
}

/// Row-major `[rows, cols]` copy as doubles.
fn as_matrix(t: &Tensor) -> Result<(Vec<f64>, usize, usize)> {
    let size = t.size()?;
    let rows = *size
        .first()
        .ok_or_else(|| CliError::Data("features must have a batch dimension".into()))?;
    let values = match t.kind()? {
        Kind::Double => t.to_vec::<f64>()?,
        Kind::Float => t.to_vec::<f32>()?.into_iter().map(f64::from).collect(),
        other => return Err(CliError::Data(format!("features must be floating point, got {:?}", other))),
    };
    let rows = rows as usize;
    let cols = if rows == 0 { 0 } else { values.len() / rows };
    Ok((values, rows, cols))
}

fn split(images: Tensor, labels: Tensor, backbone: Option<&CModule>) -> Result<Split> {
    let features = match backbone {
        Some(m) => no_grad(|| m.forward_ts(&[&images]))??,
        None => images,
    };
    let (values, rows, cols) = as_matrix(&features)?;
    let labels = labels.to_vec::<i64>()?;
    if labels.len() != rows {
        return Err(CliError::Data(format!("{} feature rows but {} labels", rows, labels.len())));
    }
    Ok(Split {
        features: Tensor::of_data(&values, &[rows as i64, cols as i64])?,
        labels,
    })
}

fn one_hot(labels: &[i64], classes: usize) -> Result<Tensor> {
    let mut values = vec![0.0f64; labels.len() * classes];
    for (row, &label) in labels.iter().enumerate() {
        if label < 0 || label as usize >= classes {
            return Err(CliError::Data(format!("label {} outside 0..{}", label, classes)));
        }
        values[row * classes + label as usize] = 1.0;
    }
    Ok(Tensor::of_data(&values, &[labels.len() as i64, classes as i64])?)
}

fn accuracy(logits: &Tensor, labels: &[i64], classes: usize) -> Result<f64> {
    if labels.is_empty() {
        return Ok(0.0);
    }
    let values = logits.to_vec::<f64>()?;
    let correct = values
        .chunks(classes)
        .zip(labels)
        .filter(|(row, label)| {
            let best = row
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
            best.0 as i64 == **label
        })
        .count();
    Ok(correct as f64 / labels.len() as f64)
}

pub fn run(archive: &Path, backbone: Option<&Path>, config: &TrainConfig) -> Result<TransferReport> {
    lanternrt::manual_seed(config.seed)?;
    let mut entries: HashMap<String, Tensor> = Tensor::load_multi(archive)?.into_iter().collect();
    let backbone = backbone.map(CModule::load).transpose()?;
    let train = split(
        take(&mut entries, "train_images")?,
        take(&mut entries, "train_labels")?,
        backbone.as_ref(),
    )?;
    let test = split(
        take(&mut entries, "test_images")?,
        take(&mut entries, "test_labels")?,
        backbone.as_ref(),
    )?;

    let features = train.features.size()?[1] as usize;
    let classes = train
        .labels
        .iter()
        .chain(&test.labels)
        .copied()
        .max()
        .map_or(0, |max| max.max(0) as usize + 1);
    if classes == 0 || features == 0 {
        return Err(CliError::Data("nothing to train on".into()));
    }
    tracing::info!(
        train = train.labels.len(),
        test = test.labels.len(),
        features,
        classes,
        "dataset loaded"
    );
    let targets = one_hot(&train.labels, classes)?;

    let scale = Scalar::float(1.0 / (features as f64).sqrt())?;
    let weight = Tensor::rand(&[features as i64, classes as i64], Kind::Double)?.mul_scalar(&scale)?;
    let bias = Tensor::zeros(&[1, classes as i64], Kind::Double)?;
    weight.set_requires_grad(true)?;
    bias.set_requires_grad(true)?;

    let mut opt = config.optim.to_optimizer_config().build(config.optim.lr)?;
    opt.add_parameters(&[&weight, &bias])?;

    let mut final_loss = f64::NAN;
    let mut test_accuracy = 0.0;
    for epoch in 1..=config.epochs {
        let predicted = train.features.matmul(&weight)?.add(&bias)?;
        let diff = predicted.sub(&targets)?;
        let loss = diff.mul(&diff)?.mean()?;
        opt.backward_step(&loss)?;
        final_loss = loss.double_value(&[])?;
        if !final_loss.is_finite() {
            return Err(CliError::Data(format!("loss diverged at epoch {}", epoch)));
        }

        if epoch % config.log_interval == 0 || epoch == config.epochs {
            let logits = no_grad(|| -> lanternrt::Result<Tensor> { test.features.matmul(&weight)?.add(&bias) })??;
            test_accuracy = accuracy(&logits, &test.labels, classes)?;
            tracing::info!(epoch, loss = final_loss, accuracy = test_accuracy, "probe");
            println!("{} {:.2}%", epoch, 100.0 * test_accuracy);
        }
    }

    Ok(TransferReport {
        classes,
        features,
        final_loss,
        test_accuracy,
    })
}
