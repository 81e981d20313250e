use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
use burn::config::Config;
use image::{Rgb, RgbImage};
use std::path::Path;
use wgan_gp_burn::model::{LossConfig, ModelConfig};
use wgan_gp_burn::training::{train, TrainingConfig};

type Backend = Autodiff<NdArray<f32>>;

fn write_gray_images(dir: &Path, count: usize) {
    std::fs::create_dir_all(dir).unwrap();
    for idx in 0..count {
        RgbImage::from_pixel(32, 32, Rgb([128, 128, 128]))
            .save(dir.join(format!("gray_{idx}.png")))
            .unwrap();
    }
}

fn smoke_config(data_dir: &Path) -> TrainingConfig {
    let model = ModelConfig::new()
        .with_image_size(32)
        .with_generator_layers(2)
        .with_critic_layers(3)
        .with_critic_dim(16);
    TrainingConfig::new(model, LossConfig::new(), data_dir.display().to_string())
        .with_num_epochs(1)
        .with_sample_count(4)
        .with_final_samples(4)
        .with_seed(0)
}

#[test]
fn one_epoch_on_gray_images_writes_every_output() {
    let scratch = tempfile::tempdir().unwrap();
    let data_dir = scratch.path().join("images");
    let run_dir = scratch.path().join("run");
    write_gray_images(&data_dir, 4);

    let report = train::<Backend>(&run_dir, smoke_config(&data_dir), NdArrayDevice::Cpu).unwrap();

    assert_eq!(report.epochs.len(), 1);
    let epoch = &report.epochs[0];
    assert!(epoch.mean_critic_loss.is_finite());
    // Four steps with a critic ratio of 5: only step 0 trains the generator.
    assert_eq!(epoch.generator_steps, 1);
    assert!(epoch.mean_generator_loss.is_some_and(f64::is_finite));
    assert!(
        epoch.last_critic_loss.abs() < epoch.first_critic_loss.abs(),
        "critic loss went from {} to {}",
        epoch.first_critic_loss,
        epoch.last_critic_loss
    );

    for dir in ["log", "model", "output", "training_data"] {
        assert!(run_dir.join(dir).is_dir(), "missing {dir}");
    }

    let saved = TrainingConfig::load(run_dir.join("model/config.json")).unwrap();
    assert_eq!(saved.seed, 0);
    assert_eq!(saved.model.critic_dim, 16);

    let metrics = std::fs::read_to_string(run_dir.join("log/metrics.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = metrics
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0]["critic"]["loss"].as_f64().unwrap(),
        epoch.first_critic_loss
    );
    assert!(lines[0]["generator_loss"].is_number());
    assert!(lines[1]["generator_loss"].is_null());
    assert!(lines
        .iter()
        .all(|line| line["critic"]["penalty"].as_f64().unwrap() >= 0.0));

    for idx in 0..4 {
        assert!(run_dir.join(format!("training_data/real_{idx:03}.png")).is_file());
    }
    assert!(run_dir.join("output/epoch_0000.png").is_file());

    assert_eq!(report.interpolation_frames.len(), 11);
    for frame in &report.interpolation_frames {
        let img = image::open(frame).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (32, 32));
    }
    assert!(run_dir.join("output/interp.gif").is_file());

    assert_eq!(report.sample_frames.len(), 4);
    let grid = image::open(run_dir.join("output/samples.png")).unwrap().to_rgb8();
    assert_eq!(grid.dimensions(), (64, 64));
}

#[test]
fn missing_image_folder_fails_with_context() {
    let scratch = tempfile::tempdir().unwrap();
    let config = smoke_config(&scratch.path().join("does-not-exist"));

    let err = train::<Backend>(&scratch.path().join("run"), config, NdArrayDevice::Cpu).unwrap_err();
    assert!(format!("{err:#}").contains("does-not-exist"));
}
