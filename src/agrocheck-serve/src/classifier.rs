use std::cmp::Ordering;

use image::DynamicImage;
use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Model, ModelArtifact, ModelCache, SavedModel, IMAGE_SIZE};
use crate::Timer;

/// Label table of the potato-disease model, positionally aligned with its
/// output vector.
pub const CLASS_NAMES: [&str; 3] = ["Early Blight", "Late Blight", "Healthy"];

/// Immutable, ordered label table injected into the classifier.
#[derive(Clone, Debug)]
pub struct ClassLabels(Vec<String>);

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        ClassLabels(labels)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn get(&self, index: usize) -> &str {
        &self.0[index]
    }
}

impl Default for ClassLabels {
    fn default() -> Self {
        ClassLabels(CLASS_NAMES.iter().map(|name| name.to_string()).collect())
    }
}

#[derive(Debug, Serialize)]
pub struct Prediction {
    /// Selected label from the class table.
    #[serde(rename = "class")]
    pub label: String,

    /// Maximum class probability as a percentage, rounded to 2 decimals.
    pub confidence: f32,
}

/// Single-shot classification pipeline: decode, resize, scale, forward
/// pass, argmax over the label table.
pub struct ImageClassifier<M> {
    model: M,
    labels: ClassLabels,
}

impl<M: Model> ImageClassifier<M> {
    pub fn new(model: M, labels: ClassLabels) -> Self {
        ImageClassifier { model, labels }
    }

    /// Classify raw image bytes as uploaded by a client.
    pub fn classify_from_raw(&self, data: &[u8]) -> Result<Prediction> {
        let t = Timer::start("Decoding image");
        let image = image::load_from_memory(data)?;
        t.stop();

        self.classify(&image)
    }

    pub fn classify(&self, image: &DynamicImage) -> Result<Prediction> {
        let t = Timer::start("Preprocessing image");

        let rgb = image.to_rgb();
        let resized = image::imageops::resize(
            &rgb,
            IMAGE_SIZE as u32,
            IMAGE_SIZE as u32,
            image::imageops::FilterType::Triangle,
        );

        // [0, 255] -> [0.0, 1.0], laid out as a [1, 256, 256, 3] batch.
        let pixels: Vec<f32> = resized
            .into_raw()
            .iter()
            .map(|p| *p as f32 / 255.0)
            .collect();

        t.stop();

        let probabilities = self.model.run(&pixels)?;
        self.pick(&probabilities)
    }

    fn pick(&self, probabilities: &[f32]) -> Result<Prediction> {
        if probabilities.len() != self.labels.len() {
            return Err(Error::OutputShape {
                expected: self.labels.len(),
                actual: probabilities.len(),
            });
        }

        let (best, probability) = probabilities
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            .ok_or(Error::OutputShape {
                expected: self.labels.len(),
                actual: 0,
            })?;

        let label = self.labels.get(best).to_owned();
        let confidence = (probability * 10_000.0).round() / 100.0;

        debug!("predicted {} at {:.2}%", label, confidence);

        Ok(Prediction { label, confidence })
    }
}

impl ModelCache<ImageClassifier<SavedModel>> {
    /// Cache wired to fetch the remote artifact and build the classifier on
    /// first use.
    pub fn for_artifact(artifact: ModelArtifact, labels: ClassLabels) -> Self {
        ModelCache::new(move || {
            let model = artifact.fetch_and_load()?;
            Ok(ImageClassifier::new(model, labels.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubModel(Vec<f32>);

    impl Model for StubModel {
        fn run(&self, pixels: &[f32]) -> Result<Vec<f32>> {
            assert_eq!(pixels.len(), (IMAGE_SIZE * IMAGE_SIZE * 3) as usize);
            assert!(pixels.iter().all(|p| (0.0..=1.0).contains(p)));
            Ok(self.0.clone())
        }
    }

    fn classifier(output: Vec<f32>) -> ImageClassifier<StubModel> {
        ImageClassifier::new(StubModel(output), ClassLabels::default())
    }

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::new_rgb8(width, height);
        let mut buf = Vec::new();
        image
            .write_to(&mut buf, image::ImageOutputFormat::PNG)
            .unwrap();
        buf
    }

    #[test]
    fn picks_the_highest_probability_label() {
        let prediction = classifier(vec![0.1, 0.1, 0.8])
            .classify_from_raw(&png_fixture(64, 64))
            .unwrap();

        assert_eq!(prediction.label, "Healthy");
        assert_eq!(prediction.confidence, 80.0);
    }

    #[test]
    fn confidence_is_rounded_to_two_decimals() {
        let prediction = classifier(vec![0.123_456, 0.5, 0.3])
            .classify_from_raw(&png_fixture(64, 64))
            .unwrap();

        assert_eq!(prediction.label, "Late Blight");
        assert_eq!(prediction.confidence, 50.0);

        let prediction = classifier(vec![0.123_456, 0.1, 0.1])
            .classify_from_raw(&png_fixture(64, 64))
            .unwrap();

        assert_eq!(prediction.label, "Early Blight");
        assert_eq!(prediction.confidence, 12.35);
    }

    #[test]
    fn any_input_resolution_is_resized_to_the_model_shape() {
        for &(w, h) in &[(1, 1), (7, 13), (512, 256), (300, 40)] {
            let prediction = classifier(vec![0.6, 0.3, 0.1])
                .classify_from_raw(&png_fixture(w, h))
                .unwrap();

            assert!(CLASS_NAMES.contains(&prediction.label.as_str()));
            assert!(prediction.confidence >= 0.0 && prediction.confidence <= 100.0);
        }
    }

    #[test]
    fn corrupt_bytes_are_an_invalid_image_error() {
        let err = classifier(vec![0.1, 0.1, 0.8])
            .classify_from_raw(b"definitely not an image")
            .unwrap_err();

        match err {
            Error::InvalidImage(_) => {}
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn output_shape_mismatch_is_rejected() {
        let err = classifier(vec![0.2; 5])
            .classify_from_raw(&png_fixture(64, 64))
            .unwrap_err();

        match err {
            Error::OutputShape {
                expected: 3,
                actual: 5,
            } => {}
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn prediction_serializes_with_the_wire_field_names() {
        let prediction = Prediction {
            label: "Healthy".to_owned(),
            confidence: 80.0,
        };

        assert_eq!(
            serde_json::to_string(&prediction).unwrap(),
            r#"{"class":"Healthy","confidence":80.0}"#
        );
    }
}
