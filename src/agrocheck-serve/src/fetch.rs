use std::fs::{self, File};
use std::path::Path;

use log::info;

use crate::error::Result;

const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Download one object from the bucket to a local file, overwriting any
/// existing file at the destination. No retry and no integrity check;
/// transport and IO errors propagate to the caller.
pub fn download_blob(bucket: &str, object: &str, destination: &Path) -> Result<()> {
    let url = format!("{}/{}/{}", STORAGE_ENDPOINT, bucket, object);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut resp = reqwest::get(&url)?.error_for_status()?;
    let mut file = File::create(destination)?;
    resp.copy_to(&mut file)?;

    info!("Blob {} downloaded to {}", object, destination.display());

    Ok(())
}
