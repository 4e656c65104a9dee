//! Content negotiation for exporter responses
//!
//! The upstream's `Content-Type` decides which decoder runs. Anything that is
//! not exactly the delimited `MetricFamily` protobuf type falls back to the
//! text exposition format, including missing or malformed headers.

use std::collections::HashMap;
use std::fmt;

/// `Accept` header sent to exporters: delimited protobuf preferred, text 0.0.4 as fallback
pub const ACCEPT_HEADER: &str = "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited;q=0.7,text/plain;version=0.0.4;q=0.3";

const PROTOBUF_MEDIA_TYPE: &str = "application/vnd.google.protobuf";
const METRIC_FAMILY_PROTO: &str = "io.prometheus.client.MetricFamily";
const DELIMITED_ENCODING: &str = "delimited";

/// How a response body is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    BinaryDelimited,
    TextExposition,
}

impl DecodeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BinaryDelimited => "protobuf",
            Self::TextExposition => "text",
        }
    }
}

impl fmt::Display for DecodeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick a decoder for the given `Content-Type` value
pub fn select_strategy(content_type: Option<&str>) -> DecodeStrategy {
    let Some((media_type, params)) = content_type.and_then(parse_media_type) else {
        return DecodeStrategy::TextExposition;
    };

    let is_delimited_family = media_type == PROTOBUF_MEDIA_TYPE
        && params.get("encoding").map(String::as_str) == Some(DELIMITED_ENCODING)
        && params.get("proto").map(String::as_str) == Some(METRIC_FAMILY_PROTO);

    if is_delimited_family {
        DecodeStrategy::BinaryDelimited
    } else {
        DecodeStrategy::TextExposition
    }
}

/// Split a media type into its lowercased `type/subtype` and parameter map.
///
/// Returns `None` for anything that is not `token/token` followed by
/// `;name=value` pairs (values may be quoted). Duplicate parameters are rejected.
pub fn parse_media_type(value: &str) -> Option<(String, HashMap<String, String>)> {
    let mut parts = value.split(';');
    let media_type = parts.next()?.trim().to_ascii_lowercase();

    let (main, sub) = media_type.split_once('/')?;
    if !is_token(main) || !is_token(sub) {
        return None;
    }

    let mut params = HashMap::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, raw_value) = part.split_once('=')?;
        let name = name.trim().to_ascii_lowercase();
        if !is_token(&name) {
            return None;
        }
        let param_value = unquote(raw_value.trim())?;
        if params.insert(name, param_value).is_some() {
            return None;
        }
    }

    Some((media_type, params))
}

fn unquote(value: &str) -> Option<String> {
    let Some(inner) = value.strip_prefix('"') else {
        return is_token(value).then(|| value.to_string());
    };
    let inner = inner.strip_suffix('"')?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?),
            '"' => return None,
            _ => out.push(c),
        }
    }
    Some(out)
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
        })
}
