//! Topic access control and filter matching.

use burrow_core::Topic;

/// Kind of access requested on a topic or filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

/// Per-identity topic ACL.
///
/// The privileged identity may read and write anything, wildcards included.
/// Any other identity may only write its own agent-publish topics and read its
/// own backend-publish topics, named literally.
#[derive(Debug, Clone)]
pub struct TopicAcl {
    privileged: String,
}

impl TopicAcl {
    pub fn new(privileged: impl Into<String>) -> Self {
        Self {
            privileged: privileged.into(),
        }
    }

    pub fn is_privileged(&self, identity: &str) -> bool {
        identity == self.privileged
    }

    pub fn allows(&self, identity: &str, topic: &str, access: Access) -> bool {
        if self.is_privileged(identity) {
            return true;
        }
        // Topic::parse rejects wildcards through UserId validation.
        let Ok(topic) = Topic::parse(topic) else {
            return false;
        };
        if topic.user.as_str() != identity {
            return false;
        }
        match access {
            Access::Write => topic.kind.is_agent_publish(),
            Access::Read => !topic.kind.is_agent_publish(),
        }
    }
}

/// Whether a topic name is publishable (non-empty, no wildcards, no empty levels).
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(['+', '#']) && topic.split('/').all(|l| !l.is_empty())
}

/// Whether a subscription filter is well formed.
///
/// `+` must fill a whole level and `#` must be the whole last level.
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == levels.len() - 1,
        "+" => true,
        l => !l.is_empty() && !l.contains(['+', '#']),
    })
}

/// MQTT-style filter matching: `+` matches one level, `#` the remainder.
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
