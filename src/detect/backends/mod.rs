pub mod remote;
pub mod stub;

pub use remote::{RemoteClassifier, RemoteClassifierConfig};
pub use stub::{ConcurrencyProbe, StubClassifier};
