use std::fmt::{Display, Formatter};
use std::str::FromStr;

use mapper_types::Subdir;

/// The unit of parallel work: all new artifacts of one subdir whose filename
/// starts with one letter, written as `subdir@letter`.
///
/// The letter partitions the repodata lexicographically, so shards are
/// disjoint by construction and workers never contend on a hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId {
    /// The subdir the shard belongs to.
    pub subdir: Subdir,

    /// The first character of every filename in the shard.
    pub letter: char,
}

impl ShardId {
    /// Creates a shard id.
    pub fn new(subdir: Subdir, letter: char) -> Self {
        Self { subdir, letter }
    }

    /// Whether the given artifact filename belongs to this shard.
    pub fn matches(&self, filename: &str) -> bool {
        filename.starts_with(self.letter)
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.subdir, self.letter)
    }
}

/// The error returned when a shard id string is malformed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("'{0}' is not a valid shard id, expected subdir@letter")]
pub struct ParseShardError(pub String);

impl FromStr for ShardId {
    type Err = ParseShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (subdir, letter) = s
            .rsplit_once('@')
            .ok_or_else(|| ParseShardError(s.to_owned()))?;

        let mut chars = letter.chars();
        let (Some(letter), None) = (chars.next(), chars.next()) else {
            return Err(ParseShardError(s.to_owned()));
        };
        if subdir.is_empty() {
            return Err(ParseShardError(s.to_owned()));
        }

        Ok(ShardId::new(Subdir::new(subdir), letter))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let shard: ShardId = "noarch@s".parse().unwrap();
        assert_eq!(shard.subdir, Subdir::from("noarch"));
        assert_eq!(shard.letter, 's');
        assert_eq!(shard.to_string(), "noarch@s");
    }

    #[test]
    fn test_matches() {
        let shard: ShardId = "noarch@s".parse().unwrap();
        assert!(shard.matches("six-1.16.0-pyhd3eb1b0_1.tar.bz2"));
        assert!(!shard.matches("numpy-1.26.4-py311h64a7726_0.conda"));
    }

    #[test]
    fn test_invalid() {
        assert!("noarch".parse::<ShardId>().is_err());
        assert!("noarch@".parse::<ShardId>().is_err());
        assert!("noarch@ab".parse::<ShardId>().is_err());
        assert!("@s".parse::<ShardId>().is_err());
    }
}
