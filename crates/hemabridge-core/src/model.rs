//! Boundary to the external cell-image classifier.
//!
//! The trained model is not part of this crate. [`ModelHandler`] validates
//! the uploaded bytes, hands them to a [`CellClassifier`], and turns the
//! returned probability vector into a [`CellPercentages`] map.
//!
//! # Classifiers
//!
//! ```text
//! CellClassifier (trait)
//!     |
//!     +-- CommandClassifier
//!     |       Runs the model's runner as a child process: image bytes on
//!     |       stdin, JSON probabilities on stdout.
//!     |
//!     +-- FixedClassifier
//!             Returns a configured vector (demo deployments, tests).
//! ```
//!
//! # Failure modes
//!
//! - [`ModelError::ModelUnavailable`]: weights missing, runner not spawnable,
//!   runner failed or timed out, malformed runner output
//! - [`ModelError::InvalidImage`]: undecodable bytes or a side below the
//!   configured minimum
//! - [`ModelError::LowConfidence`]: the dominant class is below the usability
//!   threshold

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::GenericImageView;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::cell::{CellPercentages, CellType};

/// Errors surfaced by the model boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// The classifier cannot be used.
    #[error("model unavailable: {reason}")]
    ModelUnavailable {
        /// What went wrong.
        reason: String,
    },

    /// The upload is not a usable image.
    #[error("invalid image: {reason}")]
    InvalidImage {
        /// What went wrong.
        reason: String,
    },

    /// The classifier is not confident enough to report.
    #[error("low confidence: {confidence:.1}% is below the {threshold:.1}% threshold")]
    LowConfidence {
        /// Dominant class percentage.
        confidence: f64,
        /// Configured minimum.
        threshold: f64,
    },
}

impl ModelError {
    fn unavailable(reason: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            reason: reason.into(),
        }
    }

    fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }
}

/// Output of one successful inference.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    /// Percentage per cell type, summing to 100.
    pub percentages: CellPercentages,
    /// Percentage of the dominant class.
    pub confidence: f64,
}

/// An image classifier returning one probability per [`CellType`], in
/// [`CellType::ALL`] order.
#[async_trait]
pub trait CellClassifier: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Classifies raw image bytes.
    async fn predict(&self, image: &[u8]) -> Result<Vec<f64>, ModelError>;
}

/// Tunables for [`ModelHandler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandlerLimits {
    /// Minimum accepted width and height in pixels.
    pub min_image_side: u32,
    /// Minimum dominant-class percentage.
    pub min_confidence: f64,
}

impl Default for HandlerLimits {
    fn default() -> Self {
        Self {
            min_image_side: 32,
            min_confidence: 30.0,
        }
    }
}

/// Validates images and maps classifier output to percentages.
#[derive(Clone)]
pub struct ModelHandler {
    classifier: Arc<dyn CellClassifier>,
    limits: HandlerLimits,
}

impl std::fmt::Debug for ModelHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandler")
            .field("classifier", &self.classifier.name())
            .field("limits", &self.limits)
            .finish()
    }
}

impl ModelHandler {
    /// Creates a handler around `classifier`.
    #[must_use]
    pub fn new(classifier: Arc<dyn CellClassifier>, limits: HandlerLimits) -> Self {
        Self { classifier, limits }
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> HandlerLimits {
        self.limits
    }

    /// Runs one image through the classifier.
    ///
    /// # Errors
    ///
    /// See the module-level failure modes.
    pub async fn infer(&self, image: &[u8]) -> Result<Inference, ModelError> {
        let (width, height) = self.check_image(image).await?;
        debug!(
            classifier = self.classifier.name(),
            width,
            height,
            bytes = image.len(),
            "running inference"
        );

        let probabilities = self.classifier.predict(image).await?;
        let inference = to_inference(&probabilities)?;

        if inference.confidence < self.limits.min_confidence {
            warn!(
                confidence = inference.confidence,
                threshold = self.limits.min_confidence,
                "rejecting low-confidence inference"
            );
            return Err(ModelError::LowConfidence {
                confidence: inference.confidence,
                threshold: self.limits.min_confidence,
            });
        }

        Ok(inference)
    }

    /// Decodes the upload on the blocking pool and checks its size.
    async fn check_image(&self, bytes: &[u8]) -> Result<(u32, u32), ModelError> {
        if bytes.is_empty() {
            return Err(ModelError::invalid_image("empty upload"));
        }
        let owned = bytes.to_vec();
        let (width, height) = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&owned)
                .map(|decoded| decoded.dimensions())
                .map_err(|e| ModelError::invalid_image(format!("cannot decode image: {e}")))
        })
        .await
        .map_err(|e| ModelError::unavailable(format!("image decoding task failed: {e}")))??;

        let min = self.limits.min_image_side;
        if width < min || height < min {
            return Err(ModelError::invalid_image(format!(
                "image is {width}x{height}, minimum is {min}x{min}"
            )));
        }
        Ok((width, height))
    }
}

/// Normalizes a probability vector and scales it to percentages.
fn to_inference(probabilities: &[f64]) -> Result<Inference, ModelError> {
    if probabilities.len() != CellType::ALL.len() {
        return Err(ModelError::unavailable(format!(
            "classifier returned {} classes, expected {}",
            probabilities.len(),
            CellType::ALL.len()
        )));
    }
    if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(ModelError::unavailable(
            "classifier returned a negative or non-finite probability",
        ));
    }
    let total: f64 = probabilities.iter().sum();
    if total <= 0.0 {
        return Err(ModelError::unavailable("classifier returned all-zero output"));
    }

    let scaled: Vec<f64> = probabilities.iter().map(|p| p / total * 100.0).collect();
    let percentages = CellPercentages::from_ordered(&scaled)
        .ok_or_else(|| ModelError::unavailable("classifier output has wrong arity"))?;
    let confidence = scaled.iter().copied().fold(0.0, f64::max);

    Ok(Inference {
        percentages,
        confidence,
    })
}

/// Returns a fixed probability vector regardless of input.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    probabilities: Vec<f64>,
}

impl FixedClassifier {
    /// Creates a classifier that always answers `probabilities`.
    #[must_use]
    pub const fn new(probabilities: Vec<f64>) -> Self {
        Self { probabilities }
    }
}

#[async_trait]
impl CellClassifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn predict(&self, _image: &[u8]) -> Result<Vec<f64>, ModelError> {
        Ok(self.probabilities.clone())
    }
}

/// How to launch the external model runner.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Executable to run.
    pub command: String,
    /// Arguments placed before the weights path.
    pub args: Vec<String>,
    /// Trained weights file, passed as the last argument.
    pub weights: PathBuf,
    /// Upper bound on one inference.
    pub timeout: Duration,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RunnerOutput {
    Bare(Vec<f64>),
    Wrapped { probabilities: Vec<f64> },
}

/// Classifier backed by an external runner process.
///
/// Protocol: the runner is started as `command args... weights`, receives
/// the raw image on stdin, and prints either a JSON array of five
/// probabilities or `{"probabilities": [...]}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    spec: CommandSpec,
}

impl CommandClassifier {
    /// Checks that the weights exist and returns the classifier.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ModelUnavailable`] if the weights file is
    /// missing.
    pub fn load(spec: CommandSpec) -> Result<Self, ModelError> {
        if !spec.weights.is_file() {
            return Err(ModelError::unavailable(format!(
                "model file not found at {}",
                spec.weights.display()
            )));
        }
        Ok(Self { spec })
    }

    async fn run(&self, image: &[u8]) -> Result<Vec<u8>, ModelError> {
        let mut child = Command::new(&self.spec.command)
            .args(&self.spec.args)
            .arg(&self.spec.weights)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModelError::unavailable(format!("failed to start model runner: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ModelError::unavailable("model runner stdin unavailable"))?;
        let payload = image.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ModelError::unavailable(format!(
                    "model runner exceeded {}ms",
                    self.spec.timeout.as_millis()
                ))
            })?
            .map_err(|e| ModelError::unavailable(format!("model runner I/O error: {e}")))?;

        if let Ok(Err(e)) = writer.await {
            debug!(error = %e, "model runner closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ModelError::unavailable(format!(
                "model runner exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl CellClassifier for CommandClassifier {
    fn name(&self) -> &str {
        &self.spec.command
    }

    async fn predict(&self, image: &[u8]) -> Result<Vec<f64>, ModelError> {
        let stdout = self.run(image).await?;
        let parsed: RunnerOutput = serde_json::from_slice(&stdout)
            .map_err(|e| ModelError::unavailable(format!("malformed model runner output: {e}")))?;
        Ok(match parsed {
            RunnerOutput::Bare(p) | RunnerOutput::Wrapped { probabilities: p } => p,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn handler(probabilities: Vec<f64>) -> ModelHandler {
        ModelHandler::new(
            Arc::new(FixedClassifier::new(probabilities)),
            HandlerLimits::default(),
        )
    }

    #[tokio::test]
    async fn test_infer_scales_to_percentages() {
        let inference = handler(vec![0.1, 0.25, 0.05, 0.55, 0.05])
            .infer(&png(64, 64))
            .await
            .unwrap();

        let myeloblast = inference.percentages.get(CellType::Myeloblast).unwrap();
        assert!((myeloblast - 25.0).abs() < 1e-9);
        assert!((inference.confidence - 55.0).abs() < 1e-9);
        let total: f64 = inference.percentages.iter().map(|(_, p)| p).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unnormalized_output_is_normalized() {
        let inference = handler(vec![2.0, 4.0, 2.0, 10.0, 2.0])
            .infer(&png(64, 64))
            .await
            .unwrap();
        assert!((inference.percentages.get(CellType::Myeloblast).unwrap() - 20.0).abs() < 1e-9);
        assert!((inference.confidence - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_corrupt_bytes_are_invalid_image() {
        let err = handler(vec![0.2; 5])
            .infer(b"definitely not a png")
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidImage { .. }));

        let err = handler(vec![0.2; 5]).infer(&[]).await.unwrap_err();
        assert!(matches!(err, ModelError::InvalidImage { .. }));
    }

    #[tokio::test]
    async fn test_small_image_is_invalid_image() {
        let err = handler(vec![0.1, 0.1, 0.1, 0.6, 0.1])
            .infer(&png(8, 64))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidImage { ref reason } if reason.contains("8x64")));
    }

    #[tokio::test]
    async fn test_flat_output_is_low_confidence() {
        let err = handler(vec![0.2; 5]).infer(&png(64, 64)).await.unwrap_err();
        assert!(matches!(err, ModelError::LowConfidence { .. }));
    }

    #[tokio::test]
    async fn test_wrong_arity_is_model_unavailable() {
        let err = handler(vec![0.5, 0.5]).infer(&png(64, 64)).await.unwrap_err();
        assert!(matches!(err, ModelError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_missing_weights_is_model_unavailable() {
        let err = CommandClassifier::load(CommandSpec {
            command: "true".into(),
            args: vec![],
            weights: PathBuf::from("/nonexistent/blood_cancer_model.keras"),
            timeout: Duration::from_secs(5),
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ModelError::ModelUnavailable { ref reason } if reason.contains("not found")
        ));
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[tokio::test]
    async fn test_command_classifier_reads_runner_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let weights = dir.path().join("weights.bin");
        std::fs::write(&weights, b"w").unwrap();

        let classifier = CommandClassifier::load(CommandSpec {
            command: "sh".into(),
            args: vec![
                "-c".into(),
                r#"cat > /dev/null; echo '{"probabilities": [0.1, 0.3, 0.1, 0.4, 0.1]}'"#.into(),
            ],
            weights,
            timeout: Duration::from_secs(10),
        })
        .unwrap();

        let probabilities = classifier.predict(&png(64, 64)).await.unwrap();
        assert_eq!(probabilities, vec![0.1, 0.3, 0.1, 0.4, 0.1]);
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[tokio::test]
    async fn test_command_classifier_failure_is_model_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let weights = dir.path().join("weights.bin");
        std::fs::write(&weights, b"w").unwrap();

        let classifier = CommandClassifier::load(CommandSpec {
            command: "sh".into(),
            args: vec!["-c".into(), "echo boom >&2; exit 3".into()],
            weights,
            timeout: Duration::from_secs(10),
        })
        .unwrap();

        let err = classifier.predict(&png(64, 64)).await.unwrap_err();
        assert!(matches!(
            err,
            ModelError::ModelUnavailable { ref reason } if reason.contains("boom")
        ));
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[tokio::test]
    async fn test_command_classifier_timeout_is_model_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let weights = dir.path().join("weights.bin");
        std::fs::write(&weights, b"w").unwrap();

        let classifier = CommandClassifier::load(CommandSpec {
            command: "sh".into(),
            args: vec!["-c".into(), "exec sleep 5".into()],
            weights,
            timeout: Duration::from_millis(200),
        })
        .unwrap();

        let started = std::time::Instant::now();
        let err = classifier.predict(&png(64, 64)).await.unwrap_err();
        match err {
            ModelError::ModelUnavailable { reason } => {
                assert!(reason.contains("exceeded 200ms"), "{reason}");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
