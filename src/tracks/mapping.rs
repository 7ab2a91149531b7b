//! Declarative audio mapping configuration
//!
//! Grammar, tokens separated by `;`:
//!
//! ```text
//! only                      reject streams without an explicit mapping
//! #<id>                     accept stream <id>, slots picked automatically
//! #<id>:<seq>               same, for the <seq>-th stream carrying <id>
//! #<id>[:<seq>]:chans=N     take the first N free slots
//! #<id>[:<seq>]:s,s,...     take exactly these slots
//! ```
//!
//! Parsing is best effort: malformed tokens are skipped.

use crate::tracks::manager::{SlotIndex, StreamId};

/// How a mapped stream gets its slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRequest {
    /// As many free slots as the stream has channels
    Auto,
    /// The first `n` free slots
    Channels(usize),
    /// Exactly these slots
    Slots(Vec<SlotIndex>),
}

/// One `#id...` token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub es_id: i32,
    /// `None` matches any sequence index
    pub seq: Option<u32>,
    pub request: SlotRequest,
}

impl MappingRule {
    pub fn matches(&self, id: &StreamId) -> bool {
        self.es_id == id.es_id && self.seq.map_or(true, |seq| id.seq == Some(seq))
    }
}

/// Parsed mapping configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingConfig {
    /// Reject any stream no rule matches
    pub only: bool,
    pub rules: Vec<MappingRule>,
}

impl MappingConfig {
    pub fn parse(input: &str) -> Self {
        let mut config = Self::default();
        for token in input.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "only" {
                config.only = true;
                continue;
            }
            match parse_rule(token) {
                Some(rule) => config.rules.push(rule),
                None => tracing::debug!("Ignoring malformed audio mapping token '{}'", token),
            }
        }
        config
    }

    /// First rule matching `id`
    pub fn lookup(&self, id: &StreamId) -> Option<&MappingRule> {
        self.rules.iter().find(|r| r.matches(id))
    }

    /// Whether a stream without a rule may be attached
    pub fn accepts_unmapped(&self) -> bool {
        !self.only
    }
}

fn parse_rule(token: &str) -> Option<MappingRule> {
    let body = token.strip_prefix('#')?;
    let mut fields = body.split(':');
    let es_id = fields.next()?.trim().parse().ok()?;
    let rest: Vec<&str> = fields.map(str::trim).collect();

    let (seq, request) = match rest.as_slice() {
        [] => (None, SlotRequest::Auto),
        [one] if is_request(one) => (None, parse_request(one)?),
        [one] => (Some(one.parse().ok()?), SlotRequest::Auto),
        [seq, req] => (Some(seq.parse().ok()?), parse_request(req)?),
        _ => return None,
    };

    Some(MappingRule {
        es_id,
        seq,
        request,
    })
}

fn is_request(field: &str) -> bool {
    field.starts_with("chans=") || field.contains(',')
}

fn parse_request(field: &str) -> Option<SlotRequest> {
    if let Some(n) = field.strip_prefix("chans=") {
        let n: usize = n.trim().parse().ok()?;
        return (n > 0).then_some(SlotRequest::Channels(n));
    }
    let slots: Vec<SlotIndex> = field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    (!slots.is_empty()).then_some(SlotRequest::Slots(slots))
}
