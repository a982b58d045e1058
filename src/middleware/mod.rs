pub mod context;
pub mod logging;

pub use context::ProvideTranscription;
pub use logging::RequestLogging;
