//! Prometheus text exposition parsing.

/// Samples from a `/metrics` response, in exposition order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metrics {
    samples: Vec<(String, f64)>,
}

impl Metrics {
    /// Parse `name{labels} value [timestamp]` lines, skipping comments and
    /// lines without a numeric value.
    pub fn parse(text: &str) -> Self {
        let samples = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(parse_line)
            .collect();
        Self { samples }
    }

    /// Value of `name`.
    ///
    /// An exact key (including labels) wins; otherwise the first sample whose key
    /// starts with `name`.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.samples
            .iter()
            .find(|(key, _)| key == name)
            .or_else(|| self.samples.iter().find(|(key, _)| key.starts_with(name)))
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.samples.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

fn parse_line(line: &str) -> Option<(String, f64)> {
    // Label values may contain spaces, so split after the closing brace
    let (key, rest) = match line.find('{') {
        Some(_) => {
            let end = line.rfind('}')?;
            (&line[..=end], &line[end + 1..])
        }
        None => line.split_once(char::is_whitespace)?,
    };
    let value = rest.split_whitespace().next()?.parse().ok()?;
    Some((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# HELP libp2p_peers Total number of peers
# TYPE libp2p_peers gauge
libp2p_peers 2.0
waku_node_messages_total{type="relay"} 15.0 1700000000000
waku_connected_peers{direction="In",protocol="/vac/waku/relay/2.0.0"} 1.0
waku_store_errors{type="no peers available"} 0
garbage line
"#;

    #[test]
    fn test_parse() {
        let metrics = Metrics::parse(SAMPLE);
        assert_eq!(metrics.len(), 4);
        assert_eq!(metrics.get("libp2p_peers"), Some(2.0));
        assert_eq!(
            metrics.get(r#"waku_node_messages_total{type="relay"}"#),
            Some(15.0)
        );
        assert_eq!(
            metrics.get(r#"waku_store_errors{type="no peers available"}"#),
            Some(0.0)
        );
    }

    #[test]
    fn test_prefix_lookup() {
        let metrics = Metrics::parse(SAMPLE);
        assert_eq!(metrics.get("waku_node_messages_total"), Some(15.0));
        assert_eq!(
            metrics.get(r#"waku_connected_peers{direction="In""#),
            Some(1.0)
        );
        assert!(metrics.get("waku_missing").is_none());
    }

    #[test]
    fn test_empty() {
        assert!(Metrics::parse("").is_empty());
        assert!(Metrics::parse("# only comments\n").is_empty());
    }
}
