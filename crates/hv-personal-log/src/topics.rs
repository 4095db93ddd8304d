//! Default topic set provisioned for new personal-log channels.

use hv_common::{EventCategory, TopicCategory, TopicConfig};

/// The six default topics. Retention and filters follow the platform's
/// standard channel layout; users can replace them with explicit configs.
pub fn default_topics() -> Vec<TopicConfig> {
    vec![
        TopicConfig {
            topic_id: 1,
            name: "Authentication & Security".to_string(),
            category: TopicCategory::Authentication,
            hashtags: str_vec(&["#auth", "#security", "#login", "#token", "#2fa"]),
            event_categories: vec![EventCategory::Security, EventCategory::User],
            sources: str_vec(&["identity", "authentication"]),
            keywords: str_vec(&["login", "token"]),
            retention_hours: Some(24),
            encryption_required: None,
        },
        TopicConfig {
            topic_id: 2,
            name: "Plugin Activity".to_string(),
            category: TopicCategory::Plugin,
            hashtags: str_vec(&["#plugin", "#install", "#update", "#marketplace"]),
            event_categories: vec![EventCategory::Plugin],
            sources: str_vec(&["marketplace", "plugin_manager"]),
            keywords: str_vec(&["plugin"]),
            retention_hours: Some(72),
            encryption_required: None,
        },
        TopicConfig {
            topic_id: 3,
            name: "Payments & Transactions".to_string(),
            category: TopicCategory::Payments,
            hashtags: str_vec(&["#payment", "#transaction", "#subscription", "#revenue"]),
            event_categories: vec![EventCategory::Payment],
            sources: str_vec(&["payments", "billing"]),
            keywords: str_vec(&["payment", "invoice"]),
            retention_hours: Some(168),
            encryption_required: None,
        },
        TopicConfig {
            topic_id: 4,
            name: "Communication Logs".to_string(),
            category: TopicCategory::Communication,
            hashtags: str_vec(&["#message", "#notification", "#api", "#webhook"]),
            event_categories: vec![EventCategory::Communication, EventCategory::Webhook],
            sources: str_vec(&["bus", "communication"]),
            keywords: str_vec(&["message"]),
            retention_hours: Some(24),
            encryption_required: None,
        },
        TopicConfig {
            topic_id: 5,
            name: "System Events".to_string(),
            category: TopicCategory::System,
            hashtags: str_vec(&["#system", "#performance", "#error", "#metric"]),
            event_categories: vec![EventCategory::System, EventCategory::Error],
            sources: str_vec(&["system", "monitor"]),
            keywords: str_vec(&["error"]),
            retention_hours: Some(48),
            encryption_required: None,
        },
        general_topic(6),
    ]
}

/// Catch-all topic; every channel carries exactly one.
pub fn general_topic(topic_id: i32) -> TopicConfig {
    TopicConfig {
        topic_id,
        name: "General".to_string(),
        category: TopicCategory::General,
        hashtags: str_vec(&["#general", "#misc"]),
        event_categories: Vec::new(),
        sources: Vec::new(),
        keywords: Vec::new(),
        retention_hours: Some(24),
        encryption_required: None,
    }
}

fn str_vec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_has_stable_ids() {
        let topics = default_topics();
        let ids: Vec<i32> = topics.iter().map(|t| t.topic_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn exactly_one_general_topic() {
        let generals = default_topics()
            .into_iter()
            .filter(|t| t.category == TopicCategory::General)
            .count();
        assert_eq!(generals, 1);
    }
}
