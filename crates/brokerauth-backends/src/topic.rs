//! MQTT topic filter matching.

/// Returns `true` if `topic` matches `filter`.
///
/// `+` matches exactly one level and `#` matches the rest of the topic
/// (including the parent level itself), following MQTT 3.1.1 section 4.7.
/// Topics starting with `$` are not matched by a leading wildcard.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
