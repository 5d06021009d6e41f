use chrono::{DateTime, Utc};
use log::info;

pub mod classifier;
pub mod error;
pub mod fetch;
pub mod model;

pub use classifier::{ClassLabels, ImageClassifier, Prediction, CLASS_NAMES};
pub use error::{Error, Result};
pub use model::{Model, ModelArtifact, ModelCache, SavedModel};

/// Wall-clock timer for the expensive stages (artifact download, model
/// load, session run). Logs the duration when stopped.
pub struct Timer {
    name: String,
    started: DateTime<Utc>,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        info!("{}: starting", name);

        Timer {
            name: name.to_owned(),
            started: Utc::now(),
        }
    }

    /// Stop the timer, logging and returning the elapsed milliseconds.
    pub fn stop(self) -> i64 {
        let elapsed = (Utc::now() - self.started).num_milliseconds();
        info!("{} duration: {} msec", self.name, elapsed);
        elapsed
    }
}
