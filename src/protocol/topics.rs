//! Topic filter matching
//!
//! Filters and topics are split on `/` into levels and compared left to right:
//!
//! - `#` matches the remainder of the topic, including zero remaining levels
//! - `+` matches exactly one level
//! - any other level must be equal to the topic level
//!
//! Without a terminating `#`, filter and topic must have the same number of levels.

/// Filter that matches every topic
pub const MATCH_ALL: &str = "#";

/// Returns true if `topic` is matched by `filter`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');

    for level in filter.split('/') {
        if level == "#" {
            return true;
        }

        match topic_levels.next() {
            Some(topic_level) => {
                if level != "+" && level != topic_level {
                    return false;
                }
            }
            None => return false,
        }
    }

    topic_levels.next().is_none()
}

/// Build `base/sub`, or just `base` when `sub` is empty
pub fn join_topic(base: &str, sub: &str) -> String {
    if sub.is_empty() {
        return base.to_string();
    }

    format!("{base}/{sub}")
}
