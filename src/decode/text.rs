//! Parser for the line-oriented text exposition format (version 0.0.4)
//!
//! The whole body is parsed before anything is returned: one malformed line
//! fails the entire body. Families come back in the order they were first seen.
//!
//! Summary and histogram families are folded the same way the protobuf format
//! carries them: `quantile`-labelled samples, `<name>_bucket{le=..}`, `<name>_sum`
//! and `<name>_count` all land in one `Metric` per distinct label set.
//!
//! Blanks are allowed between a metric name and its `{`. Values accept the
//! special spellings `Inf`, `Infinity` and `NaN` in any case and with a sign;
//! hexadecimal floats and digit separators are rejected.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::{proto, LabelPair, Metric, MetricFamily, MetricType};

#[derive(Debug, Error, PartialEq)]
#[error("text format parsing error in line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Parse a complete body that may not be valid UTF-8
pub fn parse_bytes(body: &[u8]) -> Result<Vec<MetricFamily>, ParseError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ParseError::new(0, format!("body is not valid UTF-8: {}", e)))?;
    parse(text)
}

/// Parse a complete text exposition body into metric families
pub fn parse(body: &str) -> Result<Vec<MetricFamily>, ParseError> {
    let mut parser = Parser::default();
    for (idx, line) in body.lines().enumerate() {
        parser
            .line(line)
            .map_err(|reason| ParseError::new(idx + 1, reason))?;
    }
    Ok(parser.finish())
}

/// Label set with the folding label (`quantile` / `le`) removed, sorted by name
type Signature = Vec<(String, String)>;

struct FamilyBuilder {
    family: MetricFamily,
    help_seen: bool,
    type_seen: bool,
    grouped: HashMap<Signature, usize>,
}

impl FamilyBuilder {
    fn new(name: &str) -> Self {
        Self {
            family: MetricFamily {
                name: Some(name.to_string()),
                ..Default::default()
            },
            help_seen: false,
            type_seen: false,
            grouped: HashMap::new(),
        }
    }

    fn metric_type(&self) -> MetricType {
        if self.family.r#type.is_some() {
            self.family.r#type()
        } else {
            MetricType::Untyped
        }
    }

    /// Find or create the folded metric for a label set
    fn grouped_metric(&mut self, labels: Signature, init: impl FnOnce(&mut Metric)) -> &mut Metric {
        let metrics = &mut self.family.metric;
        let idx = *self.grouped.entry(labels.clone()).or_insert_with(|| {
            let mut metric = Metric {
                label: labels
                    .into_iter()
                    .map(|(name, value)| LabelPair {
                        name: Some(name),
                        value: Some(value),
                    })
                    .collect(),
                ..Default::default()
            };
            init(&mut metric);
            metrics.push(metric);
            metrics.len() - 1
        });
        &mut metrics[idx]
    }
}

/// Which part of a folded summary/histogram a sample line contributes
enum Part {
    Plain,
    Sum,
    Count,
    Bucket,
}

#[derive(Default)]
struct Parser {
    families: Vec<FamilyBuilder>,
    index: HashMap<String, usize>,
}

impl Parser {
    fn line(&mut self, line: &str) -> Result<(), String> {
        let line = line.trim_matches(|c: char| c == ' ' || c == '\t' || c == '\r');
        if line.is_empty() {
            return Ok(());
        }
        match line.strip_prefix('#') {
            Some(comment) => self.comment(comment),
            None => self.sample(line),
        }
    }

    fn family_mut(&mut self, name: &str) -> &mut FamilyBuilder {
        let idx = match self.index.get(name) {
            Some(idx) => *idx,
            None => {
                self.families.push(FamilyBuilder::new(name));
                self.index.insert(name.to_string(), self.families.len() - 1);
                self.families.len() - 1
            }
        };
        &mut self.families[idx]
    }

    fn comment(&mut self, comment: &str) -> Result<(), String> {
        let comment = comment.trim_start_matches([' ', '\t']);
        let (keyword, rest) = split_token(comment);
        match keyword {
            "HELP" => {
                let (name, text) = split_token(rest);
                if !is_metric_name(name) {
                    return Err(format!("invalid metric name in HELP line: {:?}", name));
                }
                let help = unescape_help(text)?;
                let builder = self.family_mut(name);
                if builder.help_seen {
                    return Err(format!("second HELP line for metric name {:?}", name));
                }
                builder.help_seen = true;
                builder.family.help = Some(help);
                Ok(())
            }
            "TYPE" => {
                let (name, rest) = split_token(rest);
                if !is_metric_name(name) {
                    return Err(format!("invalid metric name in TYPE line: {:?}", name));
                }
                let (keyword, trailing) = split_token(rest);
                if !trailing.is_empty() {
                    return Err(format!("unexpected text after TYPE: {:?}", trailing));
                }
                let metric_type = MetricType::from_text_keyword(keyword)
                    .ok_or_else(|| format!("unknown metric type {:?}", keyword))?;
                let builder = self.family_mut(name);
                if builder.type_seen || !builder.family.metric.is_empty() {
                    return Err(format!(
                        "second TYPE line for metric name {:?}, or TYPE reported after samples",
                        name
                    ));
                }
                builder.type_seen = true;
                builder.family.set_type(metric_type);
                Ok(())
            }
            // any other comment
            _ => Ok(()),
        }
    }

    fn sample(&mut self, line: &str) -> Result<(), String> {
        let sample = parse_sample(line)?;
        let (family_name, part) = self.resolve_family(&sample.name);

        let builder = self.family_mut(&family_name);
        let metric_type = builder.metric_type();
        if builder.family.r#type.is_none() {
            builder.family.set_type(metric_type);
        }

        match metric_type {
            MetricType::Summary => fold_summary(builder, sample, part),
            MetricType::Histogram => fold_histogram(builder, sample, part),
            MetricType::Counter | MetricType::Gauge | MetricType::Untyped => {
                let mut metric = Metric {
                    label: sample
                        .labels
                        .into_iter()
                        .map(|(name, value)| LabelPair {
                            name: Some(name),
                            value: Some(value),
                        })
                        .collect(),
                    timestamp_ms: sample.timestamp_ms,
                    ..Default::default()
                };
                let value = Some(sample.value);
                match metric_type {
                    MetricType::Counter => metric.counter = Some(proto::Counter { value }),
                    MetricType::Gauge => metric.gauge = Some(proto::Gauge { value }),
                    _ => metric.untyped = Some(proto::Untyped { value }),
                }
                builder.family.metric.push(metric);
                Ok(())
            }
        }
    }

    /// Map a sample name onto the family it belongs to. Suffixed names only
    /// fold into a family already declared as summary or histogram.
    fn resolve_family(&self, name: &str) -> (String, Part) {
        let declared = |base: &str| {
            self.index
                .get(base)
                .map(|idx| self.families[*idx].metric_type())
        };

        if let Some(base) = name.strip_suffix("_sum") {
            if matches!(declared(base), Some(MetricType::Summary | MetricType::Histogram)) {
                return (base.to_string(), Part::Sum);
            }
        }
        if let Some(base) = name.strip_suffix("_count") {
            if matches!(declared(base), Some(MetricType::Summary | MetricType::Histogram)) {
                return (base.to_string(), Part::Count);
            }
        }
        if let Some(base) = name.strip_suffix("_bucket") {
            if declared(base) == Some(MetricType::Histogram) {
                return (base.to_string(), Part::Bucket);
            }
        }
        (name.to_string(), Part::Plain)
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_iter()
            .filter(|b| !b.family.metric.is_empty())
            .map(|b| b.family)
            .collect()
    }
}

fn fold_summary(builder: &mut FamilyBuilder, sample: Sample, part: Part) -> Result<(), String> {
    let name = sample.name.clone();
    let (signature, quantile) = take_label(sample.labels, "quantile");
    let metric = builder.grouped_metric(signature, |m| m.summary = Some(proto::Summary::default()));
    if sample.timestamp_ms.is_some() {
        metric.timestamp_ms = sample.timestamp_ms;
    }
    let summary = metric.summary.get_or_insert_with(Default::default);

    match part {
        Part::Sum => summary.sample_sum = Some(sample.value),
        Part::Count => summary.sample_count = Some(sample.value as u64),
        Part::Plain => {
            let raw = quantile.ok_or_else(|| format!("summary sample {:?} has no quantile label", name))?;
            let q = parse_float(&raw).ok_or_else(|| format!("invalid quantile {:?}", raw))?;
            summary.quantile.push(proto::Quantile {
                quantile: Some(q),
                value: Some(sample.value),
            });
        }
        Part::Bucket => return Err(format!("unexpected bucket sample {:?} in summary", name)),
    }
    Ok(())
}

fn fold_histogram(builder: &mut FamilyBuilder, sample: Sample, part: Part) -> Result<(), String> {
    let name = sample.name.clone();
    let (signature, le) = take_label(sample.labels, "le");

    let metric = builder.grouped_metric(signature, |m| m.histogram = Some(proto::Histogram::default()));
    if sample.timestamp_ms.is_some() {
        metric.timestamp_ms = sample.timestamp_ms;
    }
    let histogram = metric.histogram.get_or_insert_with(Default::default);

    match part {
        Part::Sum => histogram.sample_sum = Some(sample.value),
        Part::Count => histogram.sample_count = Some(sample.value as u64),
        Part::Bucket => {
            let raw = le.ok_or_else(|| format!("histogram bucket {:?} has no le label", name))?;
            let upper_bound = parse_float(&raw).ok_or_else(|| format!("invalid le {:?}", raw))?;
            histogram.bucket.push(proto::Bucket {
                cumulative_count: Some(sample.value as u64),
                upper_bound: Some(upper_bound),
            });
        }
        Part::Plain => {
            return Err(format!(
                "histogram sample {:?} needs a _bucket, _sum or _count suffix",
                name
            ))
        }
    }
    Ok(())
}

/// Remove `key` from the label list, returning the sorted remainder and its value
fn take_label(labels: Vec<(String, String)>, key: &str) -> (Signature, Option<String>) {
    let mut taken = None;
    let mut rest: Signature = labels
        .into_iter()
        .filter_map(|(name, value)| {
            if name == key {
                taken = Some(value);
                None
            } else {
                Some((name, value))
            }
        })
        .collect();
    rest.sort();
    (rest, taken)
}

struct Sample {
    name: String,
    labels: Vec<(String, String)>,
    value: f64,
    timestamp_ms: Option<i64>,
}

fn parse_sample(line: &str) -> Result<Sample, String> {
    let name_end = line
        .find(|c: char| c == '{' || c == ' ' || c == '\t')
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_metric_name(name) {
        return Err(format!("invalid metric name {:?}", name));
    }

    let mut rest = &line[name_end..];
    let mut labels = Vec::new();
    if let Some(after_brace) = rest.trim_start_matches([' ', '\t']).strip_prefix('{') {
        let (parsed, remaining) = parse_labels(after_brace)?;
        labels = parsed;
        rest = remaining;
    }

    if !rest.starts_with([' ', '\t']) {
        return Err(format!("expected whitespace before value, found {:?}", rest));
    }
    let mut tokens = rest.split_ascii_whitespace();
    let raw_value = tokens.next().ok_or("missing sample value")?;
    let value = parse_float(raw_value).ok_or_else(|| format!("invalid value {:?}", raw_value))?;

    let timestamp_ms = match tokens.next() {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| format!("invalid timestamp {:?}", raw))?,
        ),
        None => None,
    };
    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected token after sample: {:?}", extra));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Parse `name="value",...}` and return the labels plus the text after `}`
fn parse_labels(input: &str) -> Result<(Vec<(String, String)>, &str), String> {
    let mut labels: Vec<(String, String)> = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches([' ', '\t']);
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let name_end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .ok_or("unterminated label set")?;
        let name = &rest[..name_end];
        if !is_label_name(name) {
            return Err(format!("invalid label name {:?}", name));
        }
        if labels.iter().any(|(existing, _)| existing == name) {
            return Err(format!("duplicate label name {:?}", name));
        }

        rest = rest[name_end..].trim_start_matches([' ', '\t']);
        rest = rest
            .strip_prefix('=')
            .ok_or_else(|| format!("expected '=' after label name {:?}", name))?;
        rest = rest.trim_start_matches([' ', '\t']);
        rest = rest
            .strip_prefix('"')
            .ok_or_else(|| format!("expected '\"' to open value of label {:?}", name))?;

        let (value, after_value) = parse_label_value(rest)?;
        labels.push((name.to_string(), value));

        rest = after_value.trim_start_matches([' ', '\t']);
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err(format!("expected ',' or '}}' after label {:?}", name));
        }
    }
}

/// Read an escaped label value up to its closing quote
fn parse_label_value(input: &str) -> Result<(String, &str), String> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &input[idx + 1..])),
            '\\' => match chars.next() {
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, 'n')) => value.push('\n'),
                Some((_, other)) => {
                    return Err(format!("invalid escape sequence '\\{}' in label value", other))
                }
                None => break,
            },
            _ => value.push(c),
        }
    }
    Err("unterminated label value".to_string())
}

fn unescape_help(text: &str) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some(other) => {
                return Err(format!("invalid escape sequence '\\{}' in HELP text", other))
            }
            None => return Err("trailing backslash in HELP text".to_string()),
        }
    }
    Ok(out)
}

/// Split off the first whitespace-delimited token; the remainder keeps
/// everything after a single run of separating whitespace
fn split_token(s: &str) -> (&str, &str) {
    match s.find([' ', '\t']) {
        Some(idx) => (&s[..idx], s[idx..].trim_start_matches([' ', '\t'])),
        None => (s, ""),
    }
}

/// Decimal floats plus `Inf`/`Infinity`/`NaN` in any case, optionally signed
fn parse_float(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok()
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_of(metric: &Metric) -> Vec<(&str, &str)> {
        metric.label.iter().map(|l| (l.name(), l.value())).collect()
    }

    #[test]
    fn test_counter_with_type() {
        let families = parse("# TYPE foo counter\nfoo 3\n").unwrap();
        assert_eq!(families.len(), 1);
        let foo = &families[0];
        assert_eq!(foo.name(), "foo");
        assert_eq!(foo.r#type(), MetricType::Counter);
        assert_eq!(foo.metric.len(), 1);
        assert_eq!(foo.metric[0].counter.unwrap().value(), 3.0);
    }

    #[test]
    fn test_help_type_and_labels() {
        let body = r#"
# HELP http_requests_total Total requests.\nSecond line with \\ backslash
# TYPE http_requests_total counter
http_requests_total{method="post",code="200"} 1027 1395066363000
http_requests_total{method="post",code="400"}    3 1395066363000
"#;
        let families = parse(body).unwrap();
        assert_eq!(families.len(), 1);
        let f = &families[0];
        assert_eq!(f.help(), "Total requests.\nSecond line with \\ backslash");
        assert_eq!(f.metric.len(), 2);
        assert_eq!(labels_of(&f.metric[0]), vec![("method", "post"), ("code", "200")]);
        assert_eq!(f.metric[1].counter.unwrap().value(), 3.0);
        assert_eq!(f.metric[1].timestamp_ms, Some(1395066363000));
    }

    #[test]
    fn test_untyped_default_and_encounter_order() {
        let body = "zeta 1\nalpha{a=\"b\"} 2\nzeta 4\n";
        let families = parse(body).unwrap();
        let names: Vec<_> = families.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(families[0].r#type(), MetricType::Untyped);
        assert_eq!(families[0].metric.len(), 2);
        assert_eq!(families[0].metric[1].untyped.unwrap().value(), 4.0);
    }

    #[test]
    fn test_label_value_escapes_and_trailing_comma() {
        let body = "msg{text=\"say \\\"hi\\\"\\n\",path=\"C:\\\\tmp\",} 1\n";
        let families = parse(body).unwrap();
        assert_eq!(
            labels_of(&families[0].metric[0]),
            vec![("text", "say \"hi\"\n"), ("path", "C:\\tmp")]
        );
    }

    #[test]
    fn test_special_values() {
        let body = "# TYPE g gauge\ng{k=\"a\"} +Inf\ng{k=\"b\"} -Inf\ng{k=\"c\"} NaN\ng{k=\"d\"} 1e-3\n";
        let families = parse(body).unwrap();
        let values: Vec<f64> = families[0]
            .metric
            .iter()
            .map(|m| m.gauge.unwrap().value())
            .collect();
        assert_eq!(values[0], f64::INFINITY);
        assert_eq!(values[1], f64::NEG_INFINITY);
        assert!(values[2].is_nan());
        assert_eq!(values[3], 0.001);
    }

    #[test]
    fn test_lenient_float_spellings() {
        let body = "a inf\nb -Infinity\nc nan\nd +INF\n";
        let families = parse(body).unwrap();
        let values: Vec<f64> = families
            .iter()
            .map(|f| f.metric[0].untyped.unwrap().value())
            .collect();
        assert_eq!(values[0], f64::INFINITY);
        assert_eq!(values[1], f64::NEG_INFINITY);
        assert!(values[2].is_nan());
        assert_eq!(values[3], f64::INFINITY);

        assert!(parse("hex 0x1p-2\n").is_err());
    }

    #[test]
    fn test_blank_before_label_set() {
        let families = parse("# TYPE foo gauge\nfoo {a=\"b\"} 2\nfoo\t{a=\"c\"} 3\n").unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].metric.len(), 2);
        assert_eq!(labels_of(&families[0].metric[0]), vec![("a", "b")]);
        assert_eq!(families[0].metric[1].gauge.unwrap().value(), 3.0);
    }

    #[test]
    fn test_summary_folding() {
        let body = r#"
# HELP rpc_duration_seconds RPC latency.
# TYPE rpc_duration_seconds summary
rpc_duration_seconds{service="a",quantile="0.5"} 4773
rpc_duration_seconds{service="a",quantile="0.99"} 76656
rpc_duration_seconds_sum{service="a"} 1.7560473e+07
rpc_duration_seconds_count{service="a"} 2693
rpc_duration_seconds{quantile="0.5",service="b"} 10
rpc_duration_seconds_count{service="b"} 1
"#;
        let families = parse(body).unwrap();
        assert_eq!(families.len(), 1);
        let f = &families[0];
        assert_eq!(f.r#type(), MetricType::Summary);
        assert_eq!(f.metric.len(), 2);

        let a = f.metric[0].summary.as_ref().unwrap();
        assert_eq!(labels_of(&f.metric[0]), vec![("service", "a")]);
        assert_eq!(a.quantile.len(), 2);
        assert_eq!(a.quantile[1].quantile(), 0.99);
        assert_eq!(a.quantile[1].value(), 76656.0);
        assert_eq!(a.sample_sum(), 1.7560473e7);
        assert_eq!(a.sample_count(), 2693);

        let b = f.metric[1].summary.as_ref().unwrap();
        assert_eq!(b.sample_count(), 1);
        assert_eq!(b.quantile.len(), 1);
    }

    #[test]
    fn test_histogram_folding() {
        let body = r#"
# TYPE req_seconds histogram
req_seconds_bucket{le="0.1"} 3
req_seconds_bucket{le="+Inf"} 5
req_seconds_sum 2.5
req_seconds_count 5
"#;
        let families = parse(body).unwrap();
        let f = &families[0];
        assert_eq!(f.r#type(), MetricType::Histogram);
        assert_eq!(f.metric.len(), 1);
        let h = f.metric[0].histogram.as_ref().unwrap();
        assert_eq!(h.bucket.len(), 2);
        assert_eq!(h.bucket[1].upper_bound(), f64::INFINITY);
        assert_eq!(h.sample_count(), 5);
        assert_eq!(h.sample_sum(), 2.5);
    }

    #[test]
    fn test_suffix_without_declared_base_is_own_family() {
        let families = parse("foo_sum 1\nfoo_count 2\n").unwrap();
        let names: Vec<_> = families.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["foo_sum", "foo_count"]);
    }

    #[test]
    fn test_family_without_samples_dropped() {
        let families = parse("# HELP lonely nothing here\n# TYPE lonely gauge\nother 1\n").unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name(), "other");
    }

    #[test]
    fn test_plain_comments_and_blank_lines_ignored() {
        let families = parse("\n# just a comment\n   \n#\nfoo 1\n\n").unwrap();
        assert_eq!(families.len(), 1);
    }

    #[test]
    fn test_malformed_lines_fail_whole_body() {
        let cases = [
            ("foo 1\n1foo 2\n", 2),
            ("foo{a=\"b\" 1\n", 1),
            ("foo{a=b} 1\n", 1),
            ("foo{a=\"1\",a=\"2\"} 1\n", 1),
            ("foo notanumber\n", 1),
            ("foo 1 12.5\n", 1),
            ("foo\n", 1),
            ("foo 1 2 3\n", 1),
            ("# TYPE foo bogus\n", 1),
            ("# TYPE foo counter\n# TYPE foo gauge\n", 2),
            ("# HELP foo a\n# HELP foo b\n", 2),
            ("foo 1\n# TYPE foo counter\n", 2),
            ("# TYPE s summary\ns 1\n", 2),
            ("# TYPE s summary\ns{quantile=\"x\"} 1\n", 2),
            ("# TYPE h histogram\nh_bucket 1\n", 2),
            ("# TYPE h histogram\nh 1\n", 2),
            ("foo{a=\"\\t\"} 1\n", 1),
        ];
        for (body, line) in cases {
            let err = parse(body).unwrap_err();
            assert_eq!(err.line, line, "body {:?}: {}", body, err);
        }
    }

    #[test]
    fn test_invalid_utf8() {
        let err = parse_bytes(&[b'f', 0xff, b' ', b'1']).unwrap_err();
        assert_eq!(err.line, 0);
    }
}
