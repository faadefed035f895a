//! Subscription registry entries and topic matching

use std::fmt;
use std::sync::Arc;

use super::link::{Message, QualityOfService};

/// Callback invoked for every message matching a subscription
pub type Handler = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// A registered interest in a topic prefix
#[derive(Clone)]
pub struct Subscription {
    pub prefix: String,
    pub qos: QualityOfService,
    pub handler: Handler,
}

impl Subscription {
    pub fn new(prefix: impl Into<String>, qos: QualityOfService, handler: Handler) -> Self {
        Self {
            prefix: prefix.into(),
            qos,
            handler,
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.prefix, topic)
    }

    /// Filter sent to the broker
    ///
    /// A plain prefix becomes `{prefix}/#`, which matches the prefix itself and
    /// every topic below it. Prefixes carrying wildcards are sent as they are.
    pub fn filter(&self) -> (String, QualityOfService) {
        (wire_filter(&self.prefix), self.qos)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("prefix", &self.prefix)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

fn wire_filter(prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        "#".to_string()
    } else if prefix.split('/').any(|segment| segment == "+" || segment == "#") {
        prefix.to_string()
    } else {
        format!("{prefix}/#")
    }
}

/// Segment-aware prefix match on `/`
///
/// `a` matches `a`, `a/b` and `a/b/c` but not `ab`. A `+` segment in the prefix
/// matches exactly one level and `#` matches everything below. An empty prefix
/// matches every topic.
pub fn topic_matches(prefix: &str, topic: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }

    let mut levels = topic.split('/');
    for segment in prefix.split('/') {
        if segment == "#" {
            return true;
        }
        match levels.next() {
            Some(level) if segment == "+" || segment == level => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matching_respects_segments() {
        assert!(topic_matches("a", "a"));
        assert!(topic_matches("a", "a/b"));
        assert!(topic_matches("a", "a/b/c"));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a", "ab"));
        assert!(!topic_matches("a/b", "a"));
        assert!(!topic_matches("c", "a/b"));
    }

    #[test]
    fn test_wildcards() {
        assert!(topic_matches("+/b", "a/b"));
        assert!(topic_matches("+/b", "x/b/c"));
        assert!(!topic_matches("+/b", "a/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn test_wire_filter_covers_descendants() {
        let filter = |prefix: &str| {
            Subscription::new(prefix, QualityOfService::AtLeastOnce, Arc::new(|_: &Message| Ok(())))
                .filter()
        };

        assert_eq!(filter("acc-5"), ("acc-5/#".to_string(), QualityOfService::AtLeastOnce));
        assert_eq!(filter("a/b/").0, "a/b/#");
        assert_eq!(filter("").0, "#");
        assert_eq!(filter("+/status").0, "+/status");
        assert_eq!(filter("a/#").0, "a/#");
    }

    #[test]
    fn test_empty_and_trailing_slash() {
        assert!(topic_matches("", "a/b"));
        assert!(topic_matches("a/", "a/b"));
    }
}
