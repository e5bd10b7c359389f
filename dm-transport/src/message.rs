//! Messages, delivery guarantees and topic filters

use bytes::Bytes;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// A message as carried by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        }
    }

    /// Payload as UTF-8 text, for logging
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

/// Check a subscription filter against a concrete topic
///
/// `+` matches exactly one level, a trailing `#` matches any remaining levels
/// (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
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

/// Validate wildcard placement in a subscription filter
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == levels.len() - 1,
        "+" => true,
        other => !other.contains('#') && !other.contains('+'),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("iotdm-1/#", "iotdm-1/response", true)]
    #[case("iotdm-1/#", "iotdm-1/mgmt/custom/b/a", true)]
    #[case("iotdm-1/#", "iotdm-1", true)]
    #[case("iotdm-1/#", "iotdevice-1/notify", false)]
    #[case("iotdm-1/+/initiate/+/reboot", "iotdm-1/mgmt/initiate/device/reboot", true)]
    #[case("iotdm-1/+", "iotdm-1/mgmt/initiate", false)]
    #[case("iotdm-1/response", "iotdm-1/response", true)]
    #[case("iotdm-1/response", "iotdm-1/responses", false)]
    #[case("#", "anything/at/all", true)]
    fn test_topic_matches(#[case] filter: &str, #[case] topic: &str, #[case] expected: bool) {
        assert_eq!(topic_matches(filter, topic), expected);
    }

    #[rstest]
    #[case("iotdm-1/#", true)]
    #[case("iotdm-1/+/x", true)]
    #[case("iotdm-1/#/x", false)]
    #[case("iotdm-1/a+", false)]
    #[case("", false)]
    fn test_filter_validation(#[case] filter: &str, #[case] expected: bool) {
        assert_eq!(is_valid_filter(filter), expected);
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(QoS::default(), QoS::AtLeastOnce);
        assert!(QoS::ExactlyOnce > QoS::AtLeastOnce);
        assert_eq!(QoS::AtMostOnce.level(), 0);
    }
}
