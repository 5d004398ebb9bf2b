pub mod check;
pub mod completion;
pub mod config;
pub mod error;
pub mod history;
pub mod lineage;
pub mod model;
pub mod relation;
pub mod store;
pub mod version;
pub mod workbench;

pub use error::StoreError;
pub use model::{
    EntityType, HistoryInvalidation, SaveType, Story, StoryEntityHistory, StoryLoreRelation,
    StoryRef, StoryVersion, VersionRef,
};
pub use store::{KvStore, Repository};
pub use workbench::Workbench;
