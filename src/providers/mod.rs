pub mod contract;
pub mod edge;
pub mod elevenlabs;
pub mod google;
pub mod local_neural;
pub mod openai;
pub mod registry;

pub use contract::{AudioStream, OptionSpec, ProviderDescriptor, SynthSink, TtsProvider, VoiceRecord};
pub use registry::{ProviderRegistry, VoiceResolution};
