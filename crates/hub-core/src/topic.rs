//! Event topics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// A topic a socket connection may subscribe to.
///
/// The set is fixed at compile time; anything else is rejected at the
/// subscription boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// A data record was created.
    #[serde(rename = "data.created")]
    DataCreated,
    /// A data record was updated.
    #[serde(rename = "data.updated")]
    DataUpdated,
    /// A data record was deleted.
    #[serde(rename = "data.deleted")]
    DataDeleted,
    /// Operator notice broadcast to interested clients.
    #[serde(rename = "system.notice")]
    SystemNotice,
}

impl Topic {
    /// Every topic, in declaration order.
    pub const ALL: [Topic; 4] = [
        Topic::DataCreated,
        Topic::DataUpdated,
        Topic::DataDeleted,
        Topic::SystemNotice,
    ];

    /// Wire name, also used as the `method` of pushed event envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::DataCreated => "data.created",
            Topic::DataUpdated => "data.updated",
            Topic::DataDeleted => "data.deleted",
            Topic::SystemNotice => "system.notice",
        }
    }
}

impl FromStr for Topic {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| HubError::UnknownTopic {
                topic: s.to_owned(),
            })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_topics() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn parse_unknown_topic_fails() {
        let err = "data.exploded".parse::<Topic>().unwrap_err();
        assert!(matches!(err, HubError::UnknownTopic { ref topic } if topic == "data.exploded"));
    }

    #[test]
    fn parse_is_case_sensitive() {
        assert!("Data.Created".parse::<Topic>().is_err());
    }

    #[test]
    fn serde_matches_wire_name() {
        for topic in Topic::ALL {
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{}\"", topic.as_str()));
            let back: Topic = serde_json::from_str(&json).unwrap();
            assert_eq!(back, topic);
        }
    }
}
