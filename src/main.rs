use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use biostream::{
    logging, DeviceController, DeviceRegistry, FsRepository, ObfReader, Recorder, Repository,
    StreamConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("biostream.json"));
    let config = StreamConfig::load(&config_path)?;
    logging::init(&config.logging);

    let repository = Arc::new(
        FsRepository::new(&config.repository.root).context("Failed to open repository")?,
    );
    let registry = DeviceRegistry::with_defaults();
    let device = registry.create(&config.device, repository.clone())?;
    let controller = DeviceController::new(device, config.controller.clone());

    let device_info = controller.engage().await?;
    println!(
        "{} engaged: {} channels at {} Hz",
        controller.name(),
        device_info.channels,
        device_info.sample_rate
    );

    let recorder = Arc::new(Recorder::new(repository.clone()));
    let session = recorder.start(&controller)?;
    println!("Recording, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    let stats = session.stats();
    info!(frames = stats.frames, samples = stats.samples, "stopping");
    let result = session.stop().await;
    controller.disengage().await?;
    let id = result?;

    let path = repository.lookup(id)?;
    let reader = ObfReader::open(std::fs::File::open(&path)?)?;
    let (channels, samples) = reader.dim();
    println!("Saved {} ({} channels, {} samples) to {:?}", id, channels, samples, path);
    Ok(())
}
