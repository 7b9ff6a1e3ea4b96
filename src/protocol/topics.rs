//! Topic construction and wildcard sanitization
//!
//! Log records and ad-hoc posts share one topic hierarchy rooted at the
//! project namespace:
//!
//! - `{project}/{logger/name}/log` for log sinks
//! - `{project}/{subtopic}` for direct posts
//! - `{project}/error` for failure diagnostics
//! - `{project}/will` for the last will message

/// Replacement for wildcard characters in sanitized topics and payloads
pub const SANITIZED_CHAR: char = '_';

/// Characters reserved for subscription filters and illegal in publish topics
pub const WILDCARDS: [char; 2] = ['+', '#'];

/// Topic construction functions for the project namespace
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build `{project}/{name}` with dots in `name` turned into level separators
    pub fn build(project: &str, name: &str) -> String {
        Self::join(project, &name.replace('.', "/"))
    }

    /// Build the log topic for a named logger: `{project}/{name}/log`
    pub fn log_topic(project: &str, name: &str) -> String {
        format!("{}/log", Self::build(project, name))
    }

    /// Build `{project}/{subtopic}` without touching `subtopic`
    pub fn join(project: &str, subtopic: &str) -> String {
        format!("{project}/{subtopic}")
    }

    /// Build the diagnostics topic: `{project}/error`
    pub fn error_topic(project: &str) -> String {
        Self::join(project, "error")
    }

    /// Build the last will topic: `{project}/will`
    pub fn will_topic(project: &str) -> String {
        Self::join(project, "will")
    }

    /// Replace every `+` and `#` with `_`, leaving everything else untouched
    pub fn sanitize(text: &str) -> String {
        text.replace(&WILDCARDS[..], &SANITIZED_CHAR.to_string())
    }

    /// Whether `topic` contains a character that is illegal in a publish topic
    pub fn has_wildcard(topic: &str) -> bool {
        topic.contains(&WILDCARDS[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn sanitize_removes_every_wildcard(text in ".*") {
            let result = TopicBuilder::sanitize(&text);
            prop_assert!(!TopicBuilder::has_wildcard(&result), "wildcard left in {}", result);
        }

        #[test]
        fn sanitize_preserves_other_characters(text in ".*") {
            let result = TopicBuilder::sanitize(&text);
            prop_assert_eq!(result.chars().count(), text.chars().count());
            for (before, after) in text.chars().zip(result.chars()) {
                if WILDCARDS.contains(&before) {
                    prop_assert_eq!(after, SANITIZED_CHAR);
                } else {
                    prop_assert_eq!(after, before);
                }
            }
        }

        #[test]
        fn sanitize_is_idempotent(text in ".*") {
            let once = TopicBuilder::sanitize(&text);
            let twice = TopicBuilder::sanitize(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn build_never_keeps_dots_in_name(name in "[a-z.]{0,32}") {
            let topic = TopicBuilder::build("DVT", &name);
            prop_assert!(!topic.contains('.'), "dot left in {}", topic);
        }
    }

    #[test]
    fn test_build_replaces_dots() {
        assert_eq!(TopicBuilder::build("DVT", "x.y.z"), "DVT/x/y/z");
        assert_eq!(TopicBuilder::build("DVT", "plain"), "DVT/plain");
    }

    #[test]
    fn test_log_topic() {
        assert_eq!(TopicBuilder::log_topic("DVT", "x.y.z"), "DVT/x/y/z/log");
        assert_eq!(
            TopicBuilder::log_topic("OTK", "runner.local"),
            "OTK/runner/local/log"
        );
    }

    #[test]
    fn test_join_keeps_subtopic_verbatim() {
        assert_eq!(TopicBuilder::join("DVT", "metrics"), "DVT/metrics");
        assert_eq!(TopicBuilder::join("DVT", "a.b/c"), "DVT/a.b/c");
    }

    #[test]
    fn test_fixed_topics() {
        assert_eq!(TopicBuilder::error_topic("DVT"), "DVT/error");
        assert_eq!(TopicBuilder::will_topic("DVT"), "DVT/will");
    }

    #[test]
    fn test_sanitize_examples() {
        assert_eq!(TopicBuilder::sanitize("DVT/a+b/#"), "DVT/a_b/_");
        assert_eq!(TopicBuilder::sanitize("cpu+load"), "cpu_load");
        assert_eq!(TopicBuilder::sanitize("nothing here"), "nothing here");
        assert_eq!(TopicBuilder::sanitize(""), "");
    }

    #[test]
    fn test_has_wildcard() {
        assert!(TopicBuilder::has_wildcard("DVT/#"));
        assert!(TopicBuilder::has_wildcard("DVT/+/log"));
        assert!(!TopicBuilder::has_wildcard("DVT/x/y/log"));
    }
}
