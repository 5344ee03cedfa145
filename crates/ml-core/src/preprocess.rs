//! Image preparation shared by the tensor-based backends.

use std::path::Path;

use image::{DynamicImage, imageops::FilterType};

use crate::ClassifyError;

pub const INPUT_EDGE_PIXELS: u32 = 224;
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decode `path` and return a planar (CHW) RGB buffer of
/// `3 * edge * edge` values normalized with the ImageNet statistics.
pub fn load_normalized(path: &Path, edge: u32) -> Result<Vec<f32>, ClassifyError> {
    let image = image::open(path).map_err(|source| ClassifyError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(normalize(&image, edge))
}

pub fn normalize(image: &DynamicImage, edge: u32) -> Vec<f32> {
    let rgb = image
        .resize_exact(edge, edge, FilterType::Triangle)
        .to_rgb8();
    let plane = (edge * edge) as usize;
    let mut data = vec![0f32; plane * 3];
    for (index, pixel) in rgb.pixels().enumerate() {
        for channel in 0..3 {
            let value = f32::from(pixel[channel]) / 255.0;
            data[channel * plane + index] = (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
        }
    }
    data
}
