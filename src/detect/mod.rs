mod backend;
mod backends;
mod result;
mod worker;

pub use backend::Classifier;
pub use backends::remote::{encode_for_detector, parse_predictions, DEFAULT_INPUT_SIZE};
pub use backends::{ConcurrencyProbe, RemoteClassifier, RemoteClassifierConfig, StubClassifier};
pub use result::{ClassLabels, Detection, DetectionBatch, DetectionClass};
pub use worker::{DetectionWorker, WorkerStats};
