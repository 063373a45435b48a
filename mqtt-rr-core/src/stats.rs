//! Per-topic message statistics for the recorder.
//!
//! Each topic tracks the delta between consecutive capture timestamps and the
//! serialized message size as running `{min, avg, max}` values. Nothing is
//! retained per message; every update is O(1).

use std::collections::BTreeMap;
use std::fmt;

/// Running min/avg/max of one metric
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatValues {
    initialized: bool,
    pub min: u64,
    pub avg: f64,
    pub max: u64,
}

impl StatValues {
    /// Fold in the `num_msgs`-th value using the streaming mean
    pub fn update(&mut self, value: u64, num_msgs: u64) {
        if !self.initialized {
            self.min = value;
            self.max = value;
            self.initialized = true;
        }

        let n = num_msgs.max(1) as f64;
        self.avg = self.avg * (n - 1.0) / n + value as f64 / n;

        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Statistics for one topic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MsgStats {
    pub last_msg_millis: i64,
    /// Messages counted after the first one on this topic
    pub num_msgs: u64,
    pub time_diff_millis: StatValues,
    pub msg_size_bytes: StatValues,
}

/// Statistics for all topics of one recording session
#[derive(Debug, Clone, Default)]
pub struct StatsAggregate {
    topics: BTreeMap<String, MsgStats>,
}

impl StatsAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one captured message.
    ///
    /// The first message on a topic only starts tracking; deltas and sizes
    /// are folded in from the second message on.
    pub fn record(&mut self, topic: &str, captured_at_millis: i64, size: usize) {
        match self.topics.get_mut(topic) {
            None => {
                self.topics.insert(
                    topic.to_string(),
                    MsgStats {
                        last_msg_millis: captured_at_millis,
                        ..Default::default()
                    },
                );
            }
            Some(stats) => {
                stats.num_msgs += 1;
                let time_diff = captured_at_millis.saturating_sub(stats.last_msg_millis).max(0) as u64;
                stats.time_diff_millis.update(time_diff, stats.num_msgs);
                stats.msg_size_bytes.update(size as u64, stats.num_msgs);
                stats.last_msg_millis = captured_at_millis;
            }
        }
    }

    pub fn get(&self, topic: &str) -> Option<&MsgStats> {
        self.topics.get(topic)
    }

    /// Topics in alphabetical order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MsgStats)> {
        self.topics.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl fmt::Display for StatsAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (topic, stat) in &self.topics {
            writeln!(
                f,
                "{:<25}: {:5} msg, {:6}/{:6.0}/{:6} byte, {:4}/{:4.0}/{:4} ms delta (min/avg/max)",
                topic,
                stat.num_msgs,
                stat.msg_size_bytes.min,
                stat.msg_size_bytes.avg,
                stat.msg_size_bytes.max,
                stat.time_diff_millis.min,
                stat.time_diff_millis.avg,
                stat.time_diff_millis.max,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_only_initializes() {
        let mut stats = StatsAggregate::new();
        stats.record("a", 1000, 30);

        let a = stats.get("a").unwrap();
        assert_eq!(a.num_msgs, 0);
        assert_eq!(a.last_msg_millis, 1000);
        assert_eq!(a.msg_size_bytes, StatValues::default());
    }

    #[test]
    fn test_running_values() {
        let mut stats = StatsAggregate::new();
        stats.record("a", 1000, 10);
        stats.record("a", 1100, 20);
        stats.record("a", 1400, 40);
        stats.record("a", 1500, 30);

        let a = stats.get("a").unwrap();
        assert_eq!(a.num_msgs, 3);
        assert_eq!(a.time_diff_millis.min, 100);
        assert_eq!(a.time_diff_millis.max, 300);
        assert!((a.time_diff_millis.avg - 500.0 / 3.0).abs() < 1e-9);
        assert_eq!(a.msg_size_bytes.min, 20);
        assert_eq!(a.msg_size_bytes.max, 40);
        assert!((a.msg_size_bytes.avg - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_topics_are_independent() {
        let mut stats = StatsAggregate::new();
        stats.record("b", 0, 1);
        stats.record("a", 10, 1);
        stats.record("b", 50, 1);

        assert_eq!(stats.get("a").unwrap().num_msgs, 0);
        assert_eq!(stats.get("b").unwrap().time_diff_millis.max, 50);
        let topics: Vec<_> = stats.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(topics, vec!["a", "b"]);
    }

    #[test]
    fn test_table_format() {
        let mut stats = StatsAggregate::new();
        stats.record("sensors/temp", 1000, 30);
        stats.record("sensors/temp", 1250, 32);

        let table = stats.to_string();
        assert_eq!(
            table,
            "sensors/temp             :     1 msg,     32/    32/    32 byte,  250/ 250/ 250 ms delta (min/avg/max)\n"
        );
    }
}
