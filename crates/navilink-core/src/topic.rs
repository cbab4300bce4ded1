//! Topic templates, rendering and matching.
//!
//! A template is a `/`-separated list of segments. A segment is either a
//! literal, a `+` wildcard, or a placeholder such as `{macAddress}` with
//! an optional literal prefix and suffix (`navilink-{macAddress}`).
//!
//! Placeholders are bound from a [`TopicContext`]. Unbound placeholders
//! render as `+` and match any single level, which is how session
//! segments the backend has not assigned yet are handled.

use std::cmp::Ordering;
use std::fmt;

use crate::error::RegistryError;
use crate::identity::{DeviceIdentity, SessionContext};
use crate::registry::{CommandDescriptor, EventTopic, GenerationTable, Operation};

/// Placeholder names understood by templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    DeviceType,
    MacAddress,
    HomeSeq,
    UserSeq,
    ClientId,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "deviceType" => Some(Self::DeviceType),
            "macAddress" => Some(Self::MacAddress),
            "homeSeq" => Some(Self::HomeSeq),
            "userSeq" => Some(Self::UserSeq),
            "clientId" => Some(Self::ClientId),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
    Placeholder {
        prefix: String,
        name: Placeholder,
        suffix: String,
    },
}

/// Values placeholders are rendered from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicContext {
    pub device_type: Option<String>,
    pub mac_address: Option<String>,
    pub home_seq: Option<String>,
    pub user_seq: Option<String>,
    pub client_id: Option<String>,
}

impl TopicContext {
    /// Context with every placeholder unbound.
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn new(identity: &DeviceIdentity, session: &SessionContext) -> Self {
        Self {
            device_type: Some(identity.device_type.to_string()),
            mac_address: Some(identity.mac_address.clone()),
            home_seq: session.home_seq.clone(),
            user_seq: session.user_seq.clone(),
            client_id: session.client_id.clone(),
        }
    }

    fn value(&self, name: Placeholder) -> Option<&str> {
        match name {
            Placeholder::DeviceType => self.device_type.as_deref(),
            Placeholder::MacAddress => self.mac_address.as_deref(),
            Placeholder::HomeSeq => self.home_seq.as_deref(),
            Placeholder::UserSeq => self.user_seq.as_deref(),
            Placeholder::ClientId => self.client_id.as_deref(),
        }
    }
}

/// Pattern a single segment resolves to once the context is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolved<'a> {
    Exact(String),
    Partial { prefix: &'a str, suffix: &'a str },
}

impl Resolved<'_> {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Self::Exact(s) => s == segment,
            Self::Partial { prefix, suffix } => {
                segment.len() > prefix.len() + suffix.len()
                    && segment.starts_with(prefix)
                    && segment.ends_with(suffix)
            }
        }
    }

    fn overlaps(&self, other: &Resolved<'_>) -> bool {
        match (self, other) {
            (Resolved::Exact(a), Resolved::Exact(b)) => a == b,
            (Resolved::Exact(a), p @ Resolved::Partial { .. }) | (p @ Resolved::Partial { .. }, Resolved::Exact(a)) => {
                p.matches(a)
            }
            (
                Resolved::Partial {
                    prefix: p1,
                    suffix: s1,
                },
                Resolved::Partial {
                    prefix: p2,
                    suffix: s2,
                },
            ) => {
                (p1.starts_with(p2) || p2.starts_with(p1))
                    && (s1.ends_with(s2) || s2.ends_with(s1))
            }
        }
    }
}

/// Ranking used to pick the most specific of several matching templates.
///
/// Greater is more specific: fewer wildcard segments, then more literal
/// characters, then more segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    pub wildcards: usize,
    pub literal_chars: usize,
    pub segments: usize,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wildcards
            .cmp(&self.wildcards)
            .then(self.literal_chars.cmp(&other.literal_chars))
            .then(self.segments.cmp(&other.segments))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed topic template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicTemplate {
    /// Parse a template string.
    pub fn parse(template: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        if template.is_empty() {
            return Err(invalid("empty template"));
        }

        let mut segments = Vec::new();
        for part in template.split('/') {
            if part.is_empty() {
                return Err(invalid("empty segment"));
            }
            if part == "+" {
                segments.push(Segment::Wildcard);
                continue;
            }
            if part.contains('#') || (part.contains('+') && part != "+") {
                return Err(invalid("wildcards must occupy a whole segment"));
            }
            match (part.find('{'), part.find('}')) {
                (None, None) => segments.push(Segment::Literal(part.to_string())),
                (Some(open), Some(close)) if open < close => {
                    let rest = &part[close + 1..];
                    if rest.contains('{') || rest.contains('}') {
                        return Err(invalid("more than one placeholder in a segment"));
                    }
                    let name = Placeholder::parse(&part[open + 1..close])
                        .ok_or_else(|| invalid("unknown placeholder"))?;
                    segments.push(Segment::Placeholder {
                        prefix: part[..open].to_string(),
                        name,
                        suffix: rest.to_string(),
                    });
                }
                _ => return Err(invalid("unbalanced braces")),
            }
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn resolve<'a>(&'a self, ctx: &TopicContext) -> Vec<Resolved<'a>> {
        self.segments
            .iter()
            .map(|seg| match seg {
                Segment::Literal(s) => Resolved::Exact(s.clone()),
                Segment::Wildcard => Resolved::Partial {
                    prefix: "",
                    suffix: "",
                },
                Segment::Placeholder {
                    prefix,
                    name,
                    suffix,
                } => match ctx.value(*name) {
                    Some(v) => Resolved::Exact(format!("{prefix}{v}{suffix}")),
                    None => Resolved::Partial { prefix, suffix },
                },
            })
            .collect()
    }

    /// Render for subscribing. Unbound segments become `+`.
    pub fn render_pattern(&self, ctx: &TopicContext) -> String {
        self.resolve(ctx)
            .into_iter()
            .map(|r| match r {
                Resolved::Exact(s) => s,
                Resolved::Partial { .. } => "+".to_string(),
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Render a concrete topic for publishing. Returns `None` when a
    /// placeholder is unbound or the template has a wildcard.
    pub fn render(&self, ctx: &TopicContext) -> Option<String> {
        self.resolve(ctx)
            .into_iter()
            .map(|r| match r {
                Resolved::Exact(s) => Some(s),
                Resolved::Partial { .. } => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join("/"))
    }

    /// Whether a concrete topic matches this template under `ctx`.
    pub fn matches(&self, topic: &str, ctx: &TopicContext) -> bool {
        let resolved = self.resolve(ctx);
        let mut levels = topic.split('/');
        let mut count = 0;
        for pattern in &resolved {
            match levels.next() {
                Some(level) if pattern.matches(level) => count += 1,
                _ => return false,
            }
        }
        levels.next().is_none() && count == resolved.len()
    }

    /// Whether some topic could match both templates under `ctx`.
    pub fn overlaps(&self, other: &TopicTemplate, ctx: &TopicContext) -> bool {
        let a = self.resolve(ctx);
        let b = other.resolve(ctx);
        a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.overlaps(y))
    }

    pub fn specificity(&self, ctx: &TopicContext) -> Specificity {
        let mut spec = Specificity {
            wildcards: 0,
            literal_chars: 0,
            segments: self.segments.len(),
        };
        for r in self.resolve(ctx) {
            match r {
                Resolved::Exact(s) => spec.literal_chars += s.len(),
                Resolved::Partial { prefix, suffix } => {
                    spec.literal_chars += prefix.len() + suffix.len();
                    if prefix.is_empty() && suffix.is_empty() {
                        spec.wildcards += 1;
                    }
                }
            }
        }
        spec
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Render the request topic of a descriptor.
pub fn build_request_topic(identity: &DeviceIdentity, descriptor: &CommandDescriptor) -> Option<String> {
    descriptor
        .request_template()
        .render(&TopicContext::new(identity, &SessionContext::default()))
}

/// Render the response topic of a descriptor. `None` while the session
/// segments are unknown.
pub fn build_response_topic(
    identity: &DeviceIdentity,
    descriptor: &CommandDescriptor,
    session: &SessionContext,
) -> Option<String> {
    descriptor
        .response_template()
        .render(&TopicContext::new(identity, session))
}

/// Where an inbound topic is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Response topic shared by these operations.
    Response(Vec<Operation>),
    /// Unsolicited event topic.
    Event(EventTopic),
}

/// Result of matching an inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicMatch<'a> {
    Response(&'a [Operation]),
    Event(EventTopic),
    Unmatched,
}

#[derive(Debug, Clone)]
struct Route {
    template: TopicTemplate,
    target: RouteTarget,
    specificity: Specificity,
}

/// Matches inbound topics for one device session.
#[derive(Debug, Clone)]
pub struct TopicMatcher {
    ctx: TopicContext,
    routes: Vec<Route>,
}

impl TopicMatcher {
    /// Build the matcher for a generation table under `ctx`, rejecting
    /// templates that are ambiguous once the context is applied.
    pub fn new(table: &GenerationTable, ctx: TopicContext) -> Result<Self, RegistryError> {
        let mut routes: Vec<Route> = Vec::new();

        let mut add = |template: TopicTemplate, target: RouteTarget| {
            if let Some(existing) = routes.iter_mut().find(|r| r.template == template) {
                match (&mut existing.target, target) {
                    (RouteTarget::Response(ops), RouteTarget::Response(more)) => {
                        ops.extend(more);
                        return Ok(());
                    }
                    (a, b) if *a == b => return Ok(()),
                    _ => {
                        return Err(RegistryError::AmbiguousTemplates {
                            first: existing.template.to_string(),
                            second: template.to_string(),
                        });
                    }
                }
            }
            let specificity = template.specificity(&ctx);
            routes.push(Route {
                template,
                target,
                specificity,
            });
            Ok(())
        };

        for descriptor in table.descriptors() {
            add(
                descriptor.response_template().clone(),
                RouteTarget::Response(vec![descriptor.operation]),
            )?;
        }
        for (kind, template) in table.event_templates() {
            add(template.clone(), RouteTarget::Event(*kind))?;
        }

        validate_routes(&routes, &ctx)?;
        routes.sort_by(|a, b| b.specificity.cmp(&a.specificity));

        Ok(Self { ctx, routes })
    }

    /// Classify an inbound topic.
    pub fn match_topic(&self, topic: &str) -> TopicMatch<'_> {
        // routes are sorted most specific first
        match self
            .routes
            .iter()
            .find(|r| r.template.matches(topic, &self.ctx))
        {
            Some(Route {
                target: RouteTarget::Response(ops),
                ..
            }) => TopicMatch::Response(ops),
            Some(Route {
                target: RouteTarget::Event(kind),
                ..
            }) => TopicMatch::Event(*kind),
            None => TopicMatch::Unmatched,
        }
    }

    /// Subscription pattern for a route template.
    pub fn pattern(&self, template: &TopicTemplate) -> String {
        template.render_pattern(&self.ctx)
    }

    /// Patterns of all event routes.
    pub fn event_patterns(&self) -> Vec<String> {
        self.routes
            .iter()
            .filter(|r| matches!(r.target, RouteTarget::Event(_)))
            .map(|r| r.template.render_pattern(&self.ctx))
            .collect()
    }

    pub fn context(&self) -> &TopicContext {
        &self.ctx
    }
}

fn validate_routes(routes: &[Route], ctx: &TopicContext) -> Result<(), RegistryError> {
    for (i, a) in routes.iter().enumerate() {
        for b in &routes[i + 1..] {
            if a.target != b.target
                && a.specificity == b.specificity
                && a.template.overlaps(&b.template, ctx)
            {
                return Err(RegistryError::AmbiguousTemplates {
                    first: a.template.to_string(),
                    second: b.template.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Check a set of templates for ambiguity without any context bound.
pub(crate) fn validate_templates(
    templates: &[(TopicTemplate, RouteTarget)],
) -> Result<(), RegistryError> {
    let ctx = TopicContext::unbound();
    let routes: Vec<Route> = templates
        .iter()
        .map(|(t, target)| Route {
            specificity: t.specificity(&ctx),
            template: t.clone(),
            target: target.clone(),
        })
        .collect();
    validate_routes(&routes, &ctx)
}
