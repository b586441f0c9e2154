//! ScanVerdict Core - Ultrasound Upload Intake and Verdict Engine
//!
//! # The Five Laws
//! 1. Size Is Gated Before Decode
//! 2. The Receiver's Canonical Image Is Truth
//! 3. Both Sides Normalize With One Profile
//! 4. Same Canonical Bytes, Same Verdict
//! 5. The Classifier Is Replaceable, The Policy Is Not Hidden

pub mod config;
pub mod media;
pub mod decode;
pub mod validation;
pub mod normalize;
pub mod hashing;
pub mod classify;
pub mod calibrate;
pub mod pipeline;
pub mod transport;
pub mod receiver;
pub mod submitter;
pub mod controller;
pub mod telemetry;

pub use config::{PipelineConfig, NormalizationProfile, ConfigError};
pub use media::{MediaType, RawImage, UploadFile};
pub use decode::{decode, DecodedImage, DecodeError};
pub use validation::{PerceptualValidator, ValidationOutcome, ValidationRule, ValidationViolation, ViolationSeverity};
pub use normalize::{CanonicalImage, CanonicalNormalizer, NormalizationError};
pub use hashing::{Fingerprint, canonical_json, compute_profile_digest};
pub use classify::{Classifier, DigestClassifier, Label, RawVerdict};
pub use calibrate::{Calibrator, Verdict};
pub use pipeline::{VerdictPipeline, VerdictReport, PipelineError, PipelineFailure, PipelineStage, ErrorKind};
pub use transport::{SubmissionRequest, SubmissionResponse, Transport, TransportError, TransportResponse};
pub use receiver::{LocalTransport, Receiver};
pub use submitter::{CancelToken, PreparedUpload, Rejection, Submitter};
pub use controller::{UploadController, UploadHandle};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
