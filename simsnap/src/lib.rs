mod cache;
mod config;
pub mod coordinates;
mod cosmology;
mod dataset;
mod errors;
pub mod fields;
mod frontend;
mod helpers;
mod index;
mod particle_file;
mod particles;
mod store;
pub mod units;

#[cfg(test)]
mod testing;

pub use cache::DatasetCache;
pub use cache::WeakCache;

pub use config::Config;
pub use config::CONFIG_VAR;

pub use cosmology::Cosmology;
pub use cosmology::CosmologyInfo;

pub use dataset::Construction;
pub use dataset::Dataset;
pub use dataset::DatasetContext;
pub use dataset::DeferredDataset;
pub use dataset::DEFAULT_PARTICLE_TYPE;
pub use dataset::IN_MEMORY_BASENAME;

pub use errors::Error;
pub use errors::Result;

pub use frontend::CodeUnits;
pub use frontend::CosmologyParameters;
pub use frontend::Frontend;
pub use frontend::InMemoryIntrospection;
pub use frontend::Parameters;

pub use index::Index;
pub use index::IndexFields;

pub use particle_file::ParticleFile;
pub use particle_file::ParticleIo;
pub use particle_file::Region;

pub use particles::FilterRegistry;
pub use particles::FilterRequest;
pub use particles::ParticleFilter;
pub use particles::ParticleUnion;

pub use store::MemoryStore;
pub use store::MetadataStore;
pub use store::MinimalRepresentation;
pub use store::NullStore;
