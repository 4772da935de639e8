//! Domain models

mod record;
mod settings;

pub use record::{FrequencyType, Payload, Record, RecordKind, SyncId};
pub use settings::SyncSettings;
