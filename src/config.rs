use serde::{Deserialize, Serialize};

use crate::cache::meta::MAX_SHARERS;
use crate::cache::{Geometry, BLOCK_OFFSET_BITS};
use crate::replace::ReplacePolicy;

pub const MAX_PARTITIONS: usize = 64;
pub const MAX_INDEX_WIDTH: u32 = 24;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache {name:?}: partition count {got} out of range 1..={max}")]
    PartitionCount { name: String, got: usize, max: usize },

    #[error("cache {name:?}: way count {got} out of range")]
    WayCount { name: String, got: usize },

    #[error("cache {name:?}: index width {got} out of range 1..={max}")]
    IndexWidth { name: String, got: u32, max: u32 },

    #[error(
        "cache {name:?}: tag offset {tag_offset} leaves no room for \
         {index_width} index bits above the block offset"
    )]
    AddressLayout {
        name: String,
        tag_offset: u32,
        index_width: u32,
    },

    #[error("cache {name:?}: address width {got} out of range")]
    AddressWidth { name: String, got: u32 },

    #[error("cache {name:?}: directory metadata is not supported at an L1 level")]
    DirectoryAtL1 { name: String },

    #[error("hierarchy: {got} cores exceed the directory capacity of {max} coherence ids")]
    TooManyCores { got: usize, max: usize },
}

fn default_addr_width() -> u32 {
    64
}

fn default_true() -> bool {
    true
}

/// Runtime description of one cache level. Validated at construction;
/// violations are fatal configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub name: String,
    pub partitions: usize,
    pub index_width: u32,
    pub ways: usize,
    /// Bit position above which the tag begins. Skewed levels keep the whole
    /// line address as tag (`tag_offset = 6`) because hashed indices are not
    /// invertible.
    #[serde(default = "crate::config::default_tag_offset")]
    pub tag_offset: u32,
    #[serde(default = "default_addr_width")]
    pub addr_width: u32,
    #[serde(default)]
    pub directory: bool,
    #[serde(default = "default_true")]
    pub data: bool,
    #[serde(default = "crate::config::default_replacement")]
    pub replacement: ReplacePolicy,
    #[serde(default)]
    pub seed: u64,
}

pub(crate) fn default_tag_offset() -> u32 {
    BLOCK_OFFSET_BITS
}

pub(crate) fn default_replacement() -> ReplacePolicy {
    ReplacePolicy::LRU
}

impl CacheSettings {
    /// A skewed level: hashed indexing, full line address kept as tag.
    #[must_use]
    pub fn skewed(name: &str, partitions: usize, index_width: u32, ways: usize) -> Self {
        Self {
            name: name.into(),
            partitions,
            index_width,
            ways,
            tag_offset: BLOCK_OFFSET_BITS,
            addr_width: 64,
            directory: false,
            data: true,
            replacement: ReplacePolicy::LRU,
            seed: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 || self.partitions > MAX_PARTITIONS {
            return Err(ConfigError::PartitionCount {
                name: self.name.clone(),
                got: self.partitions,
                max: MAX_PARTITIONS,
            });
        }
        if self.ways == 0 {
            return Err(ConfigError::WayCount {
                name: self.name.clone(),
                got: self.ways,
            });
        }
        if self.index_width == 0 || self.index_width > MAX_INDEX_WIDTH {
            return Err(ConfigError::IndexWidth {
                name: self.name.clone(),
                got: self.index_width,
                max: MAX_INDEX_WIDTH,
            });
        }
        if self.addr_width > 64 || self.addr_width <= self.tag_offset {
            return Err(ConfigError::AddressWidth {
                name: self.name.clone(),
                got: self.addr_width,
            });
        }
        if self.tag_offset < BLOCK_OFFSET_BITS
            || (self.tag_offset > BLOCK_OFFSET_BITS
                && self.tag_offset < BLOCK_OFFSET_BITS + self.index_width)
        {
            return Err(ConfigError::AddressLayout {
                name: self.name.clone(),
                tag_offset: self.tag_offset,
                index_width: self.index_width,
            });
        }
        Ok(())
    }

    /// Address layout derived from the settings. When the tag starts right
    /// at the block offset the set index cannot be recovered from an
    /// address, so reconstruction runs with zero index bits.
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        let index_width = if self.tag_offset == BLOCK_OFFSET_BITS {
            0
        } else {
            self.index_width
        };
        Geometry {
            addr_width: self.addr_width,
            index_width,
            tag_offset: self.tag_offset,
        }
    }

    #[must_use]
    pub fn sets(&self) -> usize {
        1 << self.index_width
    }
}

/// Settings of the zs eviction-imbalance remapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemapperSettings {
    pub factor: f64,
    pub access_period: u64,
    pub evict_period: u64,
    pub threshold: f64,
}

/// Two-level hierarchy description consumed by the driver binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchySettings {
    pub cores: usize,
    pub l1: CacheSettings,
    pub llc: CacheSettings,
    #[serde(default)]
    pub remapper: Option<RemapperSettings>,
}

impl HierarchySettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.l1.validate()?;
        self.llc.validate()?;
        if self.l1.directory {
            return Err(ConfigError::DirectoryAtL1 {
                name: self.l1.name.clone(),
            });
        }
        if self.cores == 0 || self.cores > MAX_SHARERS {
            return Err(ConfigError::TooManyCores {
                got: self.cores,
                max: MAX_SHARERS,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheSettings, ConfigError, HierarchySettings};

    #[test]
    fn skewed_settings_validate() {
        let settings = CacheSettings::skewed("llc", 2, 3, 4);
        assert_eq!(settings.validate(), Ok(()));
        let geometry = settings.geometry();
        assert_eq!(geometry.index_width, 0);
        assert_eq!(geometry.tag_offset, 6);
        assert_eq!(settings.sets(), 8);
    }

    #[test]
    fn out_of_range_counts_are_fatal() {
        let mut settings = CacheSettings::skewed("bad", 0, 3, 4);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::PartitionCount { .. })
        ));

        settings.partitions = 1;
        settings.ways = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::WayCount { .. })));

        settings.ways = 2;
        settings.index_width = 40;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::IndexWidth { .. })
        ));
    }

    #[test]
    fn tag_offset_must_clear_the_index_bits() {
        let mut settings = CacheSettings::skewed("l1", 1, 2, 2);
        settings.tag_offset = 7; // between 6 and 6 + 2
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::AddressLayout { .. })
        ));

        settings.tag_offset = 8;
        settings.addr_width = 16;
        assert_eq!(settings.validate(), Ok(()));
        assert_eq!(settings.geometry().index_width, 2);
    }

    #[test]
    fn directory_l1_is_a_capability_mismatch() {
        let mut l1 = CacheSettings::skewed("l1", 1, 2, 2);
        l1.directory = true;
        let hierarchy = HierarchySettings {
            cores: 2,
            l1,
            llc: CacheSettings::skewed("llc", 2, 3, 4),
            remapper: None,
        };
        assert!(matches!(
            hierarchy.validate(),
            Err(ConfigError::DirectoryAtL1 { .. })
        ));
    }

    #[test]
    fn settings_roundtrip_through_json() {
        let settings = CacheSettings::skewed("llc", 2, 3, 4);
        let json = serde_json::to_string(&settings).unwrap();
        let back: CacheSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.partitions, 2);
        assert_eq!(back.tag_offset, 6);
    }
}
