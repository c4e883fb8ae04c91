//! Part file naming

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Index formatting convention for part files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartNaming {
    /// Indices below 10 always get two digits (`.00` .. `.09`, `.10`, ...)
    #[default]
    Padded,
    /// Two digits only when the set has 10 or more parts
    Compact,
}

impl std::str::FromStr for PartNaming {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "padded" => Ok(PartNaming::Padded),
            "compact" => Ok(PartNaming::Compact),
            _ => Err(Error::InvalidConfig(format!(
                "Unknown part naming: {}. Valid options: padded, compact",
                s
            ))),
        }
    }
}

impl std::fmt::Display for PartNaming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartNaming::Padded => write!(f, "padded"),
            PartNaming::Compact => write!(f, "compact"),
        }
    }
}

/// Maps `(base, part_count, index)` to a part file path
#[derive(Debug, Clone, Copy, Default)]
pub struct PartNamer {
    naming: PartNaming,
}

impl PartNamer {
    /// Create a namer using `naming`
    pub fn new(naming: PartNaming) -> Self {
        Self { naming }
    }

    /// Convention in use
    pub fn naming(&self) -> PartNaming {
        self.naming
    }

    /// Suffix (without the dot) for part `index` of a `part_count` set
    pub fn suffix(&self, part_count: u32, index: u32) -> String {
        let pad = match self.naming {
            PartNaming::Padded => index < 10,
            PartNaming::Compact => part_count >= 10 && index < 10,
        };
        if pad {
            format!("{:02}", index)
        } else {
            index.to_string()
        }
    }

    /// Path of part `index`: `<base>.<suffix>`
    pub fn name_for(&self, base: &Path, part_count: u32, index: u32) -> PathBuf {
        let mut name = base.as_os_str().to_owned();
        name.push(".");
        name.push(self.suffix(part_count, index));
        PathBuf::from(name)
    }

    /// Path of a single-file backup, or of part `index` when split
    pub fn target_for(&self, base: &Path, part_count: u32, index: u32) -> PathBuf {
        if part_count == 0 {
            base.to_path_buf()
        } else {
            self.name_for(base, part_count, index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_padded_names() {
        let namer = PartNamer::new(PartNaming::Padded);
        let base = Path::new("backup/rawnand.bin");
        assert_eq!(
            namer.name_for(base, 15, 0),
            PathBuf::from("backup/rawnand.bin.00")
        );
        assert_eq!(
            namer.name_for(base, 15, 9),
            PathBuf::from("backup/rawnand.bin.09")
        );
        assert_eq!(
            namer.name_for(base, 15, 10),
            PathBuf::from("backup/rawnand.bin.10")
        );
        assert_eq!(namer.name_for(base, 3, 2), PathBuf::from("backup/rawnand.bin.02"));
    }

    #[test]
    fn test_compact_names() {
        let namer = PartNamer::new(PartNaming::Compact);
        let base = Path::new("rawnand.bin");
        assert_eq!(namer.name_for(base, 3, 2), PathBuf::from("rawnand.bin.2"));
        assert_eq!(namer.name_for(base, 12, 2), PathBuf::from("rawnand.bin.02"));
        assert_eq!(namer.name_for(base, 12, 11), PathBuf::from("rawnand.bin.11"));
    }

    #[test]
    fn test_three_digit_index() {
        let namer = PartNamer::default();
        assert_eq!(namer.suffix(150, 123), "123");
    }

    #[test]
    fn test_names_are_injective() {
        for naming in [PartNaming::Padded, PartNaming::Compact] {
            let namer = PartNamer::new(naming);
            for count in [1u32, 9, 10, 11, 100, 250] {
                let names: HashSet<_> = (0..count)
                    .map(|i| namer.name_for(Path::new("x"), count, i))
                    .collect();
                assert_eq!(names.len(), count as usize, "{:?} {}", naming, count);
            }
        }
    }

    #[test]
    fn test_names_are_stable() {
        let namer = PartNamer::default();
        let a = namer.name_for(Path::new("BOOT0"), 4, 3);
        let b = namer.name_for(Path::new("BOOT0"), 4, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_target_for_single_file() {
        let namer = PartNamer::default();
        assert_eq!(
            namer.target_for(Path::new("PRODINFO"), 0, 0),
            PathBuf::from("PRODINFO")
        );
        assert_eq!(
            namer.target_for(Path::new("PRODINFO"), 2, 1),
            PathBuf::from("PRODINFO.01")
        );
    }

    #[test]
    fn test_naming_parse() {
        assert_eq!("Compact".parse::<PartNaming>().unwrap(), PartNaming::Compact);
        assert!("fancy".parse::<PartNaming>().is_err());
    }
}
