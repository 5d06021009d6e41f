use std::path::{Path, PathBuf};

use log::info;
use once_cell::sync::OnceCell;
use tensorflow::{Graph, SavedModelBundle, Session, SessionOptions, SessionRunArgs, Tensor};

use crate::error::{Error, Result};
use crate::fetch;
use crate::Timer;

/// Spatial resolution the model expects on both axes.
pub const IMAGE_SIZE: u64 = 256;

const INPUT_OP: &str = "serving_default_input_1";
const OUTPUT_OP: &str = "StatefulPartitionedCall";

pub const BUCKET_NAME: &str = "potato-disease-agrocheck";
const MODEL_PREFIX: &str = "models/potatoes";
const STAGING_DIR: &str = "/tmp/potatoes";

/// Files making up the SavedModel directory, fetched one object each.
const ARTIFACT_FILES: &[&str] = &[
    "saved_model.pb",
    "variables/variables.index",
    "variables/variables.data-00000-of-00001",
];

/// Forward pass over a preprocessed `[1, 256, 256, 3]` pixel buffer,
/// yielding the per-class probability vector.
pub trait Model {
    fn run(&self, pixels: &[f32]) -> Result<Vec<f32>>;
}

/// TensorFlow SavedModel backend.
pub struct SavedModel {
    graph: Graph,
    session: Session,
}

impl SavedModel {
    pub fn load(export_dir: &Path) -> Result<Self> {
        let t = Timer::start("Loading model");

        let mut graph = Graph::new();
        let session =
            SavedModelBundle::load(&SessionOptions::new(), &["serve"], &mut graph, export_dir)
                .map_err(Error::ModelLoad)?
                .session;

        t.stop();

        Ok(SavedModel { graph, session })
    }
}

impl Model for SavedModel {
    fn run(&self, pixels: &[f32]) -> Result<Vec<f32>> {
        let t = Timer::start("Running session");

        let input = Tensor::new(&[1, IMAGE_SIZE, IMAGE_SIZE, 3])
            .with_values(pixels)
            .map_err(Error::Inference)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(
            &self
                .graph
                .operation_by_name_required(INPUT_OP)
                .map_err(Error::Inference)?,
            0,
            &input,
        );

        let result = args.request_fetch(
            &self
                .graph
                .operation_by_name_required(OUTPUT_OP)
                .map_err(Error::Inference)?,
            0,
        );

        self.session.run(&mut args).map_err(Error::Inference)?;
        let output: Tensor<f32> = args.fetch(result).map_err(Error::Inference)?;

        t.stop();

        Ok(output.iter().cloned().collect())
    }
}

/// Fixed remote location and local staging directory of the trained model.
pub struct ModelArtifact {
    bucket: String,
    prefix: String,
    staging: PathBuf,
}

impl ModelArtifact {
    pub fn new() -> Self {
        ModelArtifact {
            bucket: BUCKET_NAME.to_owned(),
            prefix: MODEL_PREFIX.to_owned(),
            staging: PathBuf::from(STAGING_DIR),
        }
    }

    /// Materialize the artifact under the staging directory and deserialize
    /// it. Every call performs the full download; callers wanting
    /// once-per-process semantics go through [`ModelCache`].
    pub fn fetch_and_load(&self) -> Result<SavedModel> {
        let t = Timer::start("Fetching model artifact");
        for name in ARTIFACT_FILES {
            let object = format!("{}/{}", self.prefix, name);
            fetch::download_blob(&self.bucket, &object, &self.staging.join(name))?;
        }
        t.stop();

        let model = SavedModel::load(&self.staging)?;
        info!("Model loaded successfully");

        Ok(model)
    }
}

impl Default for ModelArtifact {
    fn default() -> Self {
        ModelArtifact::new()
    }
}

/// Process-wide lazily initialized holder of the loaded model. The load
/// runs at most once across concurrent callers; a failed load leaves the
/// cell empty so a later call retries.
pub struct ModelCache<M> {
    cell: OnceCell<M>,
    load: Box<dyn Fn() -> Result<M> + Send + Sync>,
}

impl<M> ModelCache<M> {
    pub fn new<F>(load: F) -> Self
    where
        F: Fn() -> Result<M> + Send + Sync + 'static,
    {
        ModelCache {
            cell: OnceCell::new(),
            load: Box::new(load),
        }
    }

    /// Return the cached value, loading it on first call. Idempotent: after
    /// the first success the stored value is returned as-is for the rest of
    /// the process lifetime.
    pub fn ensure_loaded(&self) -> Result<&M> {
        self.cell.get_or_try_init(|| (self.load)())
    }

    pub fn get(&self) -> Option<&M> {
        self.cell.get()
    }
}
