//! Image I/O. Images are `[height, width, channels]` Uint8 tensors.

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GrayImage, RgbImage};
use std::path::Path;

use super::tensor::CpuTensor;
use crate::error::{BridgeError, Result};
use crate::kind::Kind;

fn decode_error(path: &Path, err: image::ImageError) -> BridgeError {
    BridgeError::runtime(format!("{}: {}", path.display(), err))
}

pub(crate) fn load(path: &Path) -> Result<CpuTensor> {
    let img = image::open(path).map_err(|e| decode_error(path, e))?;
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let raw: Vec<i64> = rgb.into_raw().into_iter().map(i64::from).collect();
    CpuTensor::from_i64(Kind::Uint8, &[h as usize, w as usize, 3], raw)
}

fn hwc(t: &CpuTensor) -> Result<(u32, u32, u32)> {
    if t.kind()? != Kind::Uint8 {
        return Err(BridgeError::runtime(format!(
            "expected a Uint8 image tensor, got {:?}",
            t.kind()?
        )));
    }
    match t.shape()? {
        [h, w, c] if *c == 1 || *c == 3 => Ok((*h as u32, *w as u32, *c as u32)),
        other => Err(BridgeError::runtime(format!(
            "expected an image tensor of shape [h, w, 1|3], got {:?}",
            other
        ))),
    }
}

fn to_image(t: &CpuTensor) -> Result<DynamicImage> {
    let (h, w, c) = hwc(t)?;
    let raw: Vec<u8> = t.values_i64()?.into_iter().map(|v| v as u8).collect();
    let img = if c == 1 {
        GrayImage::from_raw(w, h, raw).map(DynamicImage::ImageLuma8)
    } else {
        RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8)
    };
    img.ok_or_else(|| BridgeError::runtime("image buffer does not match its dimensions"))
}

pub(crate) fn save(t: &CpuTensor, path: &Path) -> Result<()> {
    let (h, w, c) = hwc(t)?;
    let raw: Vec<u8> = t.values_i64()?.into_iter().map(|v| v as u8).collect();
    let color = if c == 1 { ColorType::L8 } else { ColorType::Rgb8 };
    image::save_buffer(path, &raw, w, h, color).map_err(|e| decode_error(path, e))
}

pub(crate) fn resize(t: &CpuTensor, width: i64, height: i64) -> Result<CpuTensor> {
    if width <= 0 || height <= 0 {
        return Err(BridgeError::runtime(format!(
            "invalid image size {}x{}",
            width, height
        )));
    }
    let (_, _, c) = hwc(t)?;
    let resized = to_image(t)?.resize_exact(width as u32, height as u32, FilterType::Triangle);
    let raw: Vec<i64> = if c == 1 {
        resized.to_luma8().into_raw().into_iter().map(i64::from).collect()
    } else {
        resized.to_rgb8().into_raw().into_iter().map(i64::from).collect()
    };
    CpuTensor::from_i64(Kind::Uint8, &[height as usize, width as usize, c as usize], raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_round_trip_and_resize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        let pixels: Vec<i64> = (0..2 * 3 * 3).map(|v| v * 10).collect();
        let t = CpuTensor::from_i64(Kind::Uint8, &[2, 3, 3], pixels.clone()).unwrap();
        save(&t, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.shape().unwrap(), &[2, 3, 3]);
        assert_eq!(loaded.values_i64().unwrap(), pixels);
        let small = resize(&loaded, 1, 1).unwrap();
        assert_eq!(small.shape().unwrap(), &[1, 1, 3]);
    }

    #[test]
    fn float_tensors_are_not_images() {
        let t = CpuTensor::zeros(&[2, 2, 3], Kind::Float).unwrap();
        assert!(save(&t, Path::new("never.png")).is_err());
    }
}
