use anyhow::{Context, Result};
use burn::prelude::*;
use burn::tensor::TensorData;
use image::{ImageFormat, RgbImage};
use indicatif::ProgressBar;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};

/// Settings for locating, sampling and resizing training images.
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub image_dir: PathBuf,
    pub image_size: u32,
    pub sample_count: usize,
}

/// List files in `dir` whose extension names a decodable image format.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", dir.display()))?
            .path();
        if path.is_file() && ImageFormat::from_path(&path).is_ok() {
            files.push(path);
        } else {
            debug!("skipping {}", path.display());
        }
    }
    files.sort();
    Ok(files)
}

/// Randomly sample images from the configured folder, resized to a square.
pub fn load_image_folder(config: &DataConfig, rng: &mut impl Rng) -> Result<Vec<RgbImage>> {
    let files = list_image_files(&config.image_dir)?;
    if files.is_empty() {
        return Err(anyhow::anyhow!(
            "no images found in {}",
            config.image_dir.display()
        ));
    }

    let count = config.sample_count.min(files.len());
    let chosen: Vec<&PathBuf> = files.choose_multiple(rng, count).collect();
    info!(
        "sampling {} of {} images from {}",
        count,
        files.len(),
        config.image_dir.display()
    );

    let progress = ProgressBar::new(count as u64);
    let mut images = Vec::with_capacity(count);
    for path in chosen {
        images.push(load_image(path, config.image_size)?);
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(images)
}

/// Decode an image file as RGB and resize it to `size x size`.
pub fn load_image(path: &Path, size: u32) -> Result<RgbImage> {
    let img = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgb8();
    Ok(resize_image(&img, size))
}

fn resize_image(img: &RgbImage, size: u32) -> RgbImage {
    if img.width() == size && img.height() == size {
        return img.clone();
    }
    image::imageops::resize(img, size, size, image::imageops::FilterType::Triangle)
}

/// Stack RGB images into a `[batch, 3, height, width]` tensor in [0, 1].
pub fn build_batch<B: Backend>(images: &[&RgbImage], device: &B::Device) -> Tensor<B, 4> {
    let batch_size = images.len();
    let (width, height) = images
        .first()
        .map(|img| img.dimensions())
        .unwrap_or((0, 0));
    let mut batch = Vec::with_capacity(batch_size * 3 * (width * height) as usize);
    for img in images {
        batch.append(&mut image_to_chw(img));
    }

    Tensor::<B, 4>::from_data(
        TensorData::new(batch, [batch_size, 3, height as usize, width as usize]),
        device,
    )
}

/// Convert RGB image data to CHW floats in [0, 1].
fn image_to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let hw = (width * height) as usize;
    let mut out = vec![0.0f32; hw * 3];

    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        out[idx] = pixel[0] as f32 / 255.0;
        out[hw + idx] = pixel[1] as f32 / 255.0;
        out[2 * hw + idx] = pixel[2] as f32 / 255.0;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn write_image(dir: &Path, name: &str, size: u32, value: u8) {
        RgbImage::from_pixel(size, size, Rgb([value, value, value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn lists_only_image_files() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", 4, 10);
        write_image(dir.path(), "b.jpg", 4, 10);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let files = list_image_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn samples_without_replacement_and_resizes() {
        let dir = tempfile::tempdir().unwrap();
        for idx in 0..5 {
            write_image(dir.path(), &format!("{idx}.png"), 20 + idx, 100);
        }
        let config = DataConfig {
            image_dir: dir.path().to_path_buf(),
            image_size: 8,
            sample_count: 3,
        };

        let images = load_image_folder(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|img| img.dimensions() == (8, 8)));
    }

    #[test]
    fn sample_count_is_capped_by_folder_size() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "only.png", 8, 0);
        let config = DataConfig {
            image_dir: dir.path().to_path_buf(),
            image_size: 8,
            sample_count: 20,
        };

        let images = load_image_folder(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn missing_or_empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfig {
            image_dir: dir.path().to_path_buf(),
            image_size: 8,
            sample_count: 2,
        };
        assert!(load_image_folder(&config, &mut StdRng::seed_from_u64(1)).is_err());

        let config = DataConfig {
            image_dir: dir.path().join("missing"),
            ..config
        };
        assert!(load_image_folder(&config, &mut StdRng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn batch_is_channel_first_in_unit_range() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([255, 51, 0]));
        let device = Default::default();

        let batch = build_batch::<NdArray<f32>>(&[&img, &img], &device);
        assert_eq!(batch.dims(), [2, 3, 2, 2]);

        let values = batch.into_data().to_vec::<f32>().unwrap();
        // red plane, pixel (x=1, y=0)
        assert_eq!(values[1], 1.0);
        // green plane
        assert!((values[4 + 1] - 0.2).abs() < 1e-6);
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
