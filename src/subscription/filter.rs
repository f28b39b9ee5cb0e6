use std::fmt;

use crate::utils::{Error, Result};

/// Separator between topic levels.
pub const LEVEL_SEPARATOR: char = '/';
/// Matches exactly one level.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Matches any number of trailing levels, including none.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// A validated subscription pattern.
///
/// Levels are separated by `/`. `+` stands for exactly one level and `#`
/// for any number of trailing levels; both must occupy a whole level and
/// `#` may only appear last.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    pub fn new(filter: &str) -> Result<Self> {
        if filter.is_empty() {
            return Err(Error::invalid_filter(filter, "filter is empty"));
        }

        let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
        let last = levels.len() - 1;

        for (index, level) in levels.iter().enumerate() {
            if level.contains(MULTI_LEVEL_WILDCARD) {
                if *level != MULTI_LEVEL_WILDCARD {
                    return Err(Error::invalid_filter(
                        filter,
                        "'#' must occupy a whole level",
                    ));
                }
                if index != last {
                    return Err(Error::invalid_filter(filter, "'#' must be the last level"));
                }
            }
            if level.contains(SINGLE_LEVEL_WILDCARD) && *level != SINGLE_LEVEL_WILDCARD {
                return Err(Error::invalid_filter(
                    filter,
                    "'+' must occupy a whole level",
                ));
            }
        }

        Ok(Self(filter.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.0.split(LEVEL_SEPARATOR)
    }

    /// Checks a concrete topic against this filter level by level.
    ///
    /// `a/+/c` matches `a/b/c` but not `a/b/c/d`; `a/#` matches `a`, `a/b`
    /// and `a/b/c`.
    pub fn matches(&self, topic: &str) -> bool {
        let mut topic_levels = topic.split(LEVEL_SEPARATOR);

        for level in self.levels() {
            match level {
                MULTI_LEVEL_WILDCARD => return true,
                SINGLE_LEVEL_WILDCARD => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                literal => {
                    if topic_levels.next() != Some(literal) {
                        return false;
                    }
                }
            }
        }

        topic_levels.next().is_none()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for TopicFilter {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

/// Rejects topics that cannot be published to: empty ones and ones
/// containing wildcard characters.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::invalid_topic(topic, "topic is empty"));
    }
    if topic.contains(SINGLE_LEVEL_WILDCARD) || topic.contains(MULTI_LEVEL_WILDCARD) {
        return Err(Error::invalid_topic(
            topic,
            "wildcards are only allowed in filters",
        ));
    }
    Ok(())
}
