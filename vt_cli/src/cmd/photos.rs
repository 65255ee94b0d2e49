use anyhow::{Context, Result, anyhow, bail};
use vt_pipeline::{Acquisition, Pipeline};

use super::{fetch_failed, pins::print_summary, resolve_pin};
use crate::PhotosCmd;

pub async fn run_photos(cmd: PhotosCmd, pipeline: &Pipeline) -> Result<()> {
    let records = pipeline.records();
    match cmd {
        PhotosCmd::Ls { pin } => {
            let pin = resolve_pin(records.as_ref(), &pin).await?;
            let photos = records.photos_for_pin(pin.id).await?;
            if photos.is_empty() {
                println!("no photos");
            }
            for photo in photos {
                let state = if pipeline.cache().contains(&photo.cache_key).await? {
                    "cached"
                } else {
                    "pending"
                };
                println!("{}\t{state}\t{}\t{}", photo.id, photo.cache_key, photo.title);
            }
        }
        PhotosCmd::Refresh { pin } => {
            let pin = resolve_pin(records.as_ref(), &pin).await?;
            match pipeline.new_collection(pin.id).await.map_err(fetch_failed)? {
                Acquisition::NoPhotos => println!("no photos found for this location"),
                acquisition @ Acquisition::Loaded { page, .. } => {
                    println!(
                        "new collection from page {page}: {} photos",
                        acquisition.photos().len()
                    );
                    let summary = pipeline
                        .settle_downloads(pin.id)
                        .await
                        .map_err(fetch_failed)?;
                    print_summary(&summary);
                }
            }
        }
        PhotosCmd::Rm { pin, photos } => {
            let pin = resolve_pin(records.as_ref(), &pin).await?;
            let removed = pipeline
                .remove_photos(pin.id, &photos)
                .await
                .map_err(fetch_failed)?;
            for photo in &removed {
                println!("removed photo {}", photo.id);
            }
            let missing = photos.len() - removed.len();
            if missing > 0 {
                eprintln!("{missing} photos were not found on pin {}", pin.name);
            }
        }
        PhotosCmd::Get { photo, out } => {
            let photo = records
                .get_photo(photo)
                .await?
                .with_context(|| format!("no photo with id {photo}"))?;

            let bytes = match pipeline.photo_image(&photo).await? {
                Some(bytes) => bytes,
                None => match pipeline
                    .download(&photo)
                    .await
                    .map_err(fetch_failed)?
                    .join()
                    .await
                {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => return Err(anyhow!(e).context("failed to download image")),
                    None => bail!("download of {} was cancelled", photo.url),
                },
            };
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("failed to write to {}", out.display()))?;
            println!("wrote {} bytes to {}", bytes.len(), out.display());
        }
    }
    Ok(())
}
