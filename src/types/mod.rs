mod extension;
mod metadata;
mod outcome;
mod quality;

pub use extension::Extension;
pub use metadata::{ItemMeta, MetadataPayload};
pub use outcome::{Outcome, UnavailableReason};
pub use quality::{AacPreference, QualityPick, Tier};
