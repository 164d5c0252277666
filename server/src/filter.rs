//! Search over the entity tree.
//!
//! A node is kept when its own name matches or when inclusion propagates to
//! it:
//!
//! - a resource is kept if it matches or any of its topics/queues is kept;
//! - a topic is kept if it matches, its resource matches, or any of its
//!   subscriptions is kept;
//! - a subscription is kept if it matches or its topic matches (directly or
//!   through the resource);
//! - a queue is kept if it matches or its resource matches.
//!
//! The filtered tree is always rebuilt from the full tree.

use crate::model::{EntityTree, QueueId, ResourceId, SubscriptionId, TopicId};
use crate::model::entities::Retain;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

/// Compiled search predicate.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    text: String,
    is_regex: bool,
    /// `None` in regex mode when the pattern does not compile
    regex: Option<Regex>,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self::new("", false)
    }
}

impl SearchFilter {
    pub fn new(text: impl Into<String>, is_regex: bool) -> Self {
        let text = text.into();
        let regex = if is_regex && !text.is_empty() {
            match RegexBuilder::new(&text).case_insensitive(true).build() {
                Ok(regex) => Some(regex),
                Err(e) => {
                    log::debug!("Search pattern '{text}' does not compile: {e}");
                    None
                }
            }
        } else {
            None
        };
        Self {
            text,
            is_regex,
            regex,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_regex(&self) -> bool {
        self.is_regex
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Empty text matches everything. A malformed pattern matches nothing.
    pub fn matches(&self, name: &str) -> bool {
        if self.text.is_empty() {
            return true;
        }
        if self.is_regex {
            return self
                .regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(name));
        }
        name.to_lowercase().contains(&self.text.to_lowercase())
    }
}

/// Builds a new tree holding only the branches `filter` keeps.
pub fn filter_tree(tree: &EntityTree, filter: &SearchFilter) -> EntityTree {
    let resource_matches: HashSet<ResourceId> = tree
        .resources()
        .filter(|r| filter.matches(&r.name))
        .map(|r| r.id)
        .collect();

    let topic_matches: HashSet<TopicId> = tree
        .all_topics()
        .filter(|t| {
            t.resource.is_some_and(|r| resource_matches.contains(&r)) || filter.matches(&t.name)
        })
        .map(|t| t.id)
        .collect();

    let kept_subscriptions: HashSet<SubscriptionId> = tree
        .all_subscriptions()
        .filter(|s| topic_matches.contains(&s.topic) || filter.matches(&s.name))
        .map(|s| s.id)
        .collect();

    let kept_topics: HashSet<TopicId> = tree
        .all_topics()
        .filter(|t| {
            topic_matches.contains(&t.id)
                || t.subscriptions.iter().any(|s| kept_subscriptions.contains(s))
        })
        .map(|t| t.id)
        .collect();

    let kept_queues: HashSet<QueueId> = tree
        .all_queues()
        .filter(|q| resource_matches.contains(&q.resource) || filter.matches(&q.name))
        .map(|q| q.id)
        .collect();

    let kept_resources: HashSet<ResourceId> = tree
        .resources()
        .filter(|r| {
            resource_matches.contains(&r.id)
                || r.topics.iter().any(|t| kept_topics.contains(t))
                || r.queues.iter().any(|q| kept_queues.contains(q))
        })
        .map(|r| r.id)
        .collect();

    tree.copy_retaining(Retain {
        resource: &|r| kept_resources.contains(&r.id),
        topic: &|t| kept_topics.contains(&t.id),
        subscription: &|s| kept_subscriptions.contains(&s.id),
        queue: &|q| kept_queues.contains(&q.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RuntimeInfo;
    use crate::model::ConnectionDescriptor;
    use chrono::Utc;

    fn tree() -> EntityTree {
        let mut tree = EntityTree::new();
        let prod = tree.add_resource("prod-ns", Utc::now(), ConnectionDescriptor::new("a", false));
        let orders = tree.add_topic(Some(prod), "orders");
        tree.add_subscription(orders, "audit", RuntimeInfo::default());
        tree.add_subscription(orders, "billing", RuntimeInfo::default());
        let events = tree.add_topic(Some(prod), "events");
        tree.add_subscription(events, "Billing-Sync", RuntimeInfo::default());
        tree.add_queue(prod, "invoices", RuntimeInfo::default());

        let dev = tree.add_resource("dev-ns", Utc::now(), ConnectionDescriptor::new("b", false));
        tree.add_queue(dev, "scratch", RuntimeInfo::default());
        tree
    }

    fn names(tree: &EntityTree) -> Vec<String> {
        let mut out = Vec::new();
        for r in tree.resources() {
            out.push(r.name.clone());
            for t in tree.topics_of(r.id) {
                out.push(format!("{}/{}", r.name, t.name));
                for s in tree.subscriptions_of(t.id) {
                    out.push(format!("{}/{}/{}", r.name, t.name, s.name));
                }
            }
            for q in tree.queues_of(r.id) {
                out.push(format!("{}/q:{}", r.name, q.name));
            }
        }
        out
    }

    #[test]
    fn subscription_match_keeps_its_ancestors_only() {
        let filtered = filter_tree(&tree(), &SearchFilter::new("BILLING", false));
        assert_eq!(
            names(&filtered),
            vec![
                "prod-ns",
                "prod-ns/orders",
                "prod-ns/orders/billing",
                "prod-ns/events",
                "prod-ns/events/Billing-Sync",
            ]
        );
    }

    #[test]
    fn topic_match_keeps_all_its_subscriptions() {
        let filtered = filter_tree(&tree(), &SearchFilter::new("orders", false));
        assert_eq!(
            names(&filtered),
            vec![
                "prod-ns",
                "prod-ns/orders",
                "prod-ns/orders/audit",
                "prod-ns/orders/billing",
            ]
        );
    }

    #[test]
    fn resource_match_keeps_everything_below() {
        let filtered = filter_tree(&tree(), &SearchFilter::new("dev", false));
        assert_eq!(names(&filtered), vec!["dev-ns", "dev-ns/q:scratch"]);
    }

    #[test]
    fn regex_is_case_insensitive() {
        let filtered = filter_tree(&tree(), &SearchFilter::new("^INV", true));
        assert_eq!(names(&filtered), vec!["prod-ns", "prod-ns/q:invoices"]);
    }

    #[test]
    fn malformed_regex_matches_nothing() {
        let filter = SearchFilter::new("(unclosed", true);
        assert!(!filter.matches("(unclosed"));
        assert!(filter_tree(&tree(), &filter).is_empty());
    }

    #[test]
    fn empty_search_keeps_the_whole_tree() {
        let full = tree();
        assert_eq!(filter_tree(&full, &SearchFilter::new("", true)), full);
    }
}
