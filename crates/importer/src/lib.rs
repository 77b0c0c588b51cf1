pub mod config;
pub mod error;
pub mod media;
pub mod capture;
pub mod scan;
pub mod ffprobe;
pub mod ffmpeg;
pub mod preset;
pub mod estimate;
pub mod preview;
pub mod job;
pub mod import;
pub mod convert;
pub mod service;

pub use config::ImporterConfig;
pub use error::{ImportError, ImportResult};
pub use media::MediaKind;
pub use scan::{DateGroup, ScanResult, SourceFile};
pub use preset::{ConversionPreset, PresetSettings};
pub use estimate::SizeEstimate;
pub use job::{Job, JobKind, JobStatus, JobSummary};
pub use import::ImportOptions;
pub use service::{DatePreview, Importer};
