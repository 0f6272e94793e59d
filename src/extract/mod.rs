pub mod content;
pub mod structure;

pub use content::{ContentExtractor, ContentThresholds, ExtractedContentItem};
pub use structure::{FormDescriptor, FormField, SiteStructure, StructureAnalyzer};
