pub mod cache;
pub mod coherence;
pub mod config;
pub mod delay;
pub mod monitor;
pub mod pfc;
pub mod replace;

pub use cache::remap::CacheRemap;
pub use cache::skewed::CacheSkewed;
pub use coherence::msi::{ExclusiveMsiPolicy, MsiPolicy};
pub use coherence::port::{CoherentCache, CoreInterface, MemoryModel};
pub use config::CacheSettings;

#[allow(non_camel_case_types)]
pub type address = u64;
