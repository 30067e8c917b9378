//! Topic name and topic filter validation applied before authorization.

use thiserror::Error;

const SHARED_PREFIX: &str = "$share/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,
    #[error("topic contains a NUL character")]
    NulCharacter,
    #[error("topic name contains a wildcard")]
    WildcardInName,
    #[error("multi-level wildcard must be the last level on its own")]
    MisplacedMultiLevel,
    #[error("single-level wildcard must occupy a whole level")]
    MisplacedSingleLevel,
    #[error("shared subscription is missing a group or filter")]
    MalformedShare,
}

/// Validate a PUBLISH topic name: non-empty, no wildcards, no NUL.
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInName);
    }
    Ok(())
}

/// Validate a SUBSCRIBE topic filter, including `$share/<group>/<filter>`.
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    let filter = match filter.strip_prefix(SHARED_PREFIX) {
        Some(rest) => {
            let (group, inner) = rest.split_once('/').ok_or(TopicError::MalformedShare)?;
            if group.is_empty() || inner.is_empty() || group.contains(['+', '#']) {
                return Err(TopicError::MalformedShare);
            }
            inner
        }
        None => filter,
    };
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedMultiLevel);
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevel);
        }
    }
    Ok(())
}

/// Topics beginning with `$` are reserved for broker-internal use.
pub fn is_dollar_topic(topic: &str) -> bool {
    topic.starts_with('$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_topics_reject_wildcards_and_empty() {
        assert!(validate_publish_topic("sensors/a/temp").is_ok());
        assert!(validate_publish_topic("/").is_ok());
        assert_eq!(validate_publish_topic(""), Err(TopicError::Empty));
        assert_eq!(
            validate_publish_topic("sensors/+/temp"),
            Err(TopicError::WildcardInName)
        );
        assert_eq!(
            validate_publish_topic("sensors/#"),
            Err(TopicError::WildcardInName)
        );
        assert_eq!(
            validate_publish_topic("a\0b"),
            Err(TopicError::NulCharacter)
        );
    }

    #[test]
    fn filters_place_wildcards_on_whole_levels() {
        for ok in ["#", "+", "a/+/c", "a/#", "+/+/#", "$share/g/a/#", "a//b"] {
            assert!(validate_topic_filter(ok).is_ok(), "{ok}");
        }
        assert_eq!(
            validate_topic_filter("a/#/c"),
            Err(TopicError::MisplacedMultiLevel)
        );
        assert_eq!(
            validate_topic_filter("a/b#"),
            Err(TopicError::MisplacedMultiLevel)
        );
        assert_eq!(
            validate_topic_filter("a/b+"),
            Err(TopicError::MisplacedSingleLevel)
        );
        assert_eq!(
            validate_topic_filter("$share//a"),
            Err(TopicError::MalformedShare)
        );
        assert_eq!(
            validate_topic_filter("$share/g"),
            Err(TopicError::MalformedShare)
        );
    }

    #[test]
    fn dollar_topics_are_detected() {
        assert!(is_dollar_topic("$SYS/broker/load"));
        assert!(!is_dollar_topic("sys/$"));
    }
}
