//! Periodic logging of controller readings.

pub mod record;
pub mod sampler;
pub mod storage;

pub use record::SampleRecord;
pub use sampler::{Sampler, SamplerReport, SamplerState};
pub use storage::CsvLog;
