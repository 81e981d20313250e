use anyhow::{Context, Result};
use burn::prelude::*;
use gif::{Encoder, Frame, Repeat};
use image::{GenericImage, Rgb, RgbImage};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Delay between GIF frames, in hundredths of a second.
const GIF_FRAME_DELAY: u16 = 20;

/// Convert a BCHW tensor in [0, 1] to a vector of RGB images.
pub fn tensor_to_images<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<RgbImage>> {
    let data = tensor.to_data().convert::<f32>();
    let shape = data.shape.clone();
    if shape.len() != 4 {
        return Err(anyhow::anyhow!(
            "expected rank-4 tensor for images, got shape {shape:?}"
        ));
    }

    let batch = shape[0];
    let channels = shape[1];
    let height = shape[2];
    let width = shape[3];

    if channels != 3 {
        return Err(anyhow::anyhow!(
            "expected 3 channels for images, got {channels}"
        ));
    }

    let values = data
        .to_vec::<f32>()
        .context("failed to read tensor data as f32")?;
    let hw = height * width;
    let mut images = Vec::with_capacity(batch);

    for b in 0..batch {
        let base = b * channels * hw;
        let mut img = RgbImage::new(width as u32, height as u32);
        for y in 0..height {
            for x in 0..width {
                let idx = y * width + x;
                let r = to_byte(values[base + idx]);
                let g = to_byte(values[base + hw + idx]);
                let b = to_byte(values[base + 2 * hw + idx]);
                img.put_pixel(x as u32, y as u32, Rgb([r, g, b]));
            }
        }
        images.push(img);
    }

    Ok(images)
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Merge images into a fixed grid (rows x cols).
pub fn merge_images(images: &[RgbImage], rows: usize, cols: usize) -> Result<RgbImage> {
    if images.is_empty() {
        return Err(anyhow::anyhow!("no images to merge"));
    }
    let width = images[0].width();
    let height = images[0].height();
    let mut out = RgbImage::new(width * cols as u32, height * rows as u32);

    for (idx, img) in images.iter().enumerate() {
        let row = idx / cols;
        let col = idx % cols;
        if row >= rows {
            break;
        }
        out.copy_from(img, (col as u32) * width, (row as u32) * height)
            .context("failed to copy image into grid")?;
    }

    Ok(out)
}

/// Smallest near-square grid holding `count` images, as (rows, cols).
pub fn grid_shape(count: usize) -> (usize, usize) {
    let cols = (count as f64).sqrt().ceil().max(1.0) as usize;
    let rows = count.div_ceil(cols).max(1);
    (rows, cols)
}

/// Save an image, creating its parent directory if needed.
pub fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok(())
}

/// Compile PNG frames, in the given order, into a looping animated GIF.
pub fn compile_frames_to_gif(frame_paths: &[PathBuf], gif_path: &Path) -> Result<()> {
    if frame_paths.is_empty() {
        return Err(anyhow::anyhow!(
            "no frames provided for {}",
            gif_path.display()
        ));
    }

    let first = image::open(&frame_paths[0])
        .with_context(|| format!("failed to open {}", frame_paths[0].display()))?
        .to_rgb8();
    let (width, height) = first.dimensions();

    let mut file = File::create(gif_path)
        .with_context(|| format!("failed to create {}", gif_path.display()))?;
    let mut encoder = Encoder::new(&mut file, width as u16, height as u16, &[])?;
    encoder.set_repeat(Repeat::Infinite)?;

    for frame_path in frame_paths {
        let img = image::open(frame_path)
            .with_context(|| format!("failed to open {}", frame_path.display()))?
            .to_rgb8();
        let img = if img.dimensions() == (width, height) {
            img
        } else {
            image::imageops::resize(&img, width, height, image::imageops::FilterType::Nearest)
        };
        let mut frame = Frame::from_rgb(width as u16, height as u16, img.as_raw());
        frame.delay = GIF_FRAME_DELAY;
        encoder.write_frame(&frame)?;
    }

    Ok(())
}
