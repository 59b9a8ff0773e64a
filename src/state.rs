use std::sync::Arc;

use crate::inference::ImageGenerator;
use crate::keystore::RecordStore;

type StoreHandle = Arc<dyn RecordStore + Sync + Send>;
type GeneratorHandle = Arc<dyn ImageGenerator + Sync + Send>;

/// Per-process collaborators, built once at startup and injected into every
/// handler. Nothing in here is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub generator: GeneratorHandle,
    pub model: String,
}
