//! Transport topic naming.
//!
//! Every agent-facing topic is `{kind}/{user_id}`.

use crate::user::UserId;
use std::fmt;

/// The five per-user topic namespaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Agent announces its inventory.
    NewCrawl,
    /// Backend asks the agent for files.
    CrawlReq,
    /// Agent streams text chunks.
    NewChunk,
    /// Backend asks the agent for specific chunks.
    QueryReq,
    /// Agent answers a chunk request.
    QueryRes,
}

impl TopicKind {
    pub const ALL: [TopicKind; 5] = [
        TopicKind::NewCrawl,
        TopicKind::CrawlReq,
        TopicKind::NewChunk,
        TopicKind::QueryReq,
        TopicKind::QueryRes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TopicKind::NewCrawl => "new_crawl",
            TopicKind::CrawlReq => "crawl_req",
            TopicKind::NewChunk => "new_chunk",
            TopicKind::QueryReq => "query_req",
            TopicKind::QueryRes => "query_res",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Whether agents publish on this kind (as opposed to subscribing).
    pub fn is_agent_publish(self) -> bool {
        matches!(
            self,
            TopicKind::NewCrawl | TopicKind::NewChunk | TopicKind::QueryRes
        )
    }

    /// Filter matching this kind for every user.
    pub fn all_users_filter(self) -> String {
        format!("{}/+", self.as_str())
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete per-user topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: TopicKind,
    pub user: UserId,
}

impl Topic {
    pub fn new(kind: TopicKind, user: UserId) -> Self {
        Self { kind, user }
    }

    /// Parse `{kind}/{user_id}`.
    pub fn parse(topic: &str) -> crate::Result<Self> {
        let (kind, user) = topic
            .split_once('/')
            .ok_or_else(|| crate::Error::InvalidTopic(format!("missing separator: {topic}")))?;
        let kind = TopicKind::parse(kind)
            .ok_or_else(|| crate::Error::InvalidTopic(format!("unknown topic kind: {kind}")))?;
        let user = UserId::new(user)
            .map_err(|e| crate::Error::InvalidTopic(format!("{topic}: {e}")))?;
        Ok(Self { kind, user })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_agree() {
        let topic = Topic::parse("query_res/user-7").unwrap();
        assert_eq!(topic.kind, TopicKind::QueryRes);
        assert_eq!(topic.user.as_str(), "user-7");
        assert_eq!(topic.to_string(), "query_res/user-7");
    }

    #[test]
    fn parse_rejects_nested_and_unknown() {
        assert!(Topic::parse("query_res").is_err());
        assert!(Topic::parse("query_res/a/b").is_err());
        assert!(Topic::parse("bogus/user").is_err());
        assert!(Topic::parse("new_crawl/").is_err());
    }

    #[test]
    fn agent_direction() {
        assert!(TopicKind::NewCrawl.is_agent_publish());
        assert!(!TopicKind::CrawlReq.is_agent_publish());
        assert!(!TopicKind::QueryReq.is_agent_publish());
        assert_eq!(TopicKind::NewChunk.all_users_filter(), "new_chunk/+");
    }
}
