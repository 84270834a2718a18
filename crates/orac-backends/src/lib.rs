//! Backend integrations: the device mapping store, the GBNF grammar
//! generator, and the backend adapters that own their native clients and
//! command dispatch.

pub mod adapter;
pub mod grammar;
pub mod ha;
pub mod record;
pub mod registry;
pub mod store;

pub use adapter::{
    AdapterStatistics, BackendAdapter, ConnectionTest, DispatchContext, DispatchResult,
    GrammarMetadata, GrammarOutput,
};
pub use grammar::{grammar_file_name, GrammarArtifact, GrammarGenerator, GrammarStats};
pub use record::{
    BackendRecord, BackendStatistics, BackendStatus, BackendType, ConnectionConfig,
    DeviceMapping, EntityDescriptor, MappingConflict, MappingPatch,
};
pub use registry::AdapterRegistry;
pub use store::MappingStore;
