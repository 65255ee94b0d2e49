use anyhow::{Result, bail};
use vt_core::Coordinates;
use vt_pipeline::{Acquisition, DownloadSummary, Pipeline};

use super::{fetch_failed, resolve_pin};
use crate::PinCmd;

pub async fn run_pins(cmd: PinCmd, pipeline: &Pipeline) -> Result<()> {
    match cmd {
        PinCmd::Add {
            latitude,
            longitude,
            name,
            no_wait,
        } => {
            let coordinates = Coordinates::new(latitude, longitude);
            if !coordinates.is_valid() {
                bail!("{coordinates} is not a valid latitude/longitude pair");
            }
            let name = name.unwrap_or_else(|| coordinates.to_string());

            let pin = pipeline
                .create_pin(name, coordinates)
                .await
                .map_err(fetch_failed)?;
            println!("added pin {}\t{}", pin.id, pin.name);

            match pipeline.acquire(pin.id).await.map_err(fetch_failed)? {
                Acquisition::NoPhotos => println!("no photos found for this location"),
                acquisition @ Acquisition::Loaded { page, .. } => {
                    println!("page {page}: {} photos", acquisition.photos().len());
                    if let Some(partial) = acquisition.partial() {
                        println!("skipped {} malformed results", partial.skipped);
                    }
                    if !no_wait {
                        let summary = pipeline
                            .settle_downloads(pin.id)
                            .await
                            .map_err(fetch_failed)?;
                        print_summary(&summary);
                    }
                }
            }
        }
        PinCmd::Ls => {
            let records = pipeline.records();
            let pins = records.list_pins().await?;
            if pins.is_empty() {
                println!("no pins");
            }
            for pin in pins {
                let photos = records.photos_for_pin(pin.id).await?.len();
                let pages = match (pin.discovered, pin.total_pages) {
                    (true, Some(0)) => "no photos available".to_owned(),
                    (true, Some(total)) => format!("page {}/{total}", pin.current_page),
                    _ => "not searched yet".to_owned(),
                };
                println!(
                    "{}\t{}\t{}\t{pages}\t{photos} photos",
                    pin.id, pin.name, pin.coordinates
                );
            }
        }
        PinCmd::Rm { pin } => {
            let pin = resolve_pin(pipeline.records().as_ref(), &pin).await?;
            let removed = pipeline.delete_pin(pin.id).await.map_err(fetch_failed)?;
            println!(
                "deleted pin {}\t{} and {} photos",
                pin.id,
                pin.name,
                removed.len()
            );
        }
    }
    Ok(())
}

pub(super) fn print_summary(summary: &DownloadSummary) {
    if summary.failed == 0 && summary.cancelled == 0 {
        println!("cached {} images", summary.cached);
    } else {
        println!(
            "cached {} images, {} failed, {} cancelled",
            summary.cached, summary.failed, summary.cancelled
        );
    }
}
