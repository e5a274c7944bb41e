//! Transport-independent inbound and outbound context fields.

use std::collections::BTreeMap;

use gridmesh_core::headers::{self, strip_baggage_prefix, BAGGAGE_PREFIX};
use gridmesh_core::resolver::{parse_trace_id, resolve_causation_id, resolve_correlation_id};
use gridmesh_core::{
    Baggage, CorrelationId, GridContext, NodeContext, ProjectId, RequestData, TenantId,
};

use super::{TransportError, TransportKind};

/// Names written by binders; everything else on an envelope is left alone.
const MANAGED_NAMES: [&str; 8] = [
    headers::CORRELATION_ID,
    headers::CAUSATION_ID,
    headers::STUDIO_ID,
    headers::NODE_ID,
    headers::ENVIRONMENT,
    headers::TENANT_ID,
    headers::PROJECT_ID,
    headers::BAGGAGE,
];

/// Returns `true` for names a binder owns and clears before rebinding.
pub(crate) fn is_managed_name(name: &str) -> bool {
    MANAGED_NAMES.iter().any(|m| m.eq_ignore_ascii_case(name))
        || strip_baggage_prefix(name).is_some()
}

/// Raw context values read from an inbound envelope.
#[derive(Debug, Default)]
pub(crate) struct InboundFields<'a> {
    correlation_id: Option<&'a str>,
    traceparent: Option<&'a str>,
    causation_id: Option<&'a str>,
    tenant_id: Option<&'a str>,
    project_id: Option<&'a str>,
    origin_node: Option<&'a str>,
    baggage_header: Option<&'a str>,
    prefixed: Vec<(&'a str, &'a str)>,
}

impl<'a> InboundFields<'a> {
    /// Collects fields from name/value pairs; names match case-insensitively.
    ///
    /// The first occurrence of a repeated name wins.
    pub(crate) fn collect<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut fields = Self::default();
        for (name, value) in pairs {
            let slot = if name.eq_ignore_ascii_case(headers::CORRELATION_ID) {
                &mut fields.correlation_id
            } else if name.eq_ignore_ascii_case(headers::TRACEPARENT) {
                &mut fields.traceparent
            } else if name.eq_ignore_ascii_case(headers::CAUSATION_ID) {
                &mut fields.causation_id
            } else if name.eq_ignore_ascii_case(headers::TENANT_ID) {
                &mut fields.tenant_id
            } else if name.eq_ignore_ascii_case(headers::PROJECT_ID) {
                &mut fields.project_id
            } else if name.eq_ignore_ascii_case(headers::NODE_ID) {
                &mut fields.origin_node
            } else if name.eq_ignore_ascii_case(headers::BAGGAGE) {
                &mut fields.baggage_header
            } else {
                if strip_baggage_prefix(name).is_some() {
                    fields.prefixed.push((name, value));
                }
                continue;
            };
            slot.get_or_insert(value);
        }
        fields
    }

    /// Whether a correlation id can be resolved without generating one.
    ///
    /// A malformed `traceparent` does not count.
    pub(crate) fn has_correlation(&self) -> bool {
        CorrelationId::parse_optional(self.correlation_id).is_some()
            || self
                .traceparent
                .and_then(parse_trace_id)
                .is_some_and(|trace_id| CorrelationId::new(trace_id).is_ok())
    }

    /// Resolves the fields into an initialized context for `node`.
    pub(crate) fn into_context(self, node: &NodeContext, kind: TransportKind) -> GridContext {
        let (correlation_id, source) =
            resolve_correlation_id(self.correlation_id, self.traceparent);
        let baggage = Baggage::from_sources(self.baggage_header, self.prefixed);

        tracing::debug!(
            transport = %kind,
            correlation_id = %correlation_id,
            source = source.as_str(),
            origin_node = self.origin_node.unwrap_or("unknown"),
            baggage_entries = baggage.len(),
            "context mapped from inbound envelope"
        );
        metrics::counter!(
            "gridmesh_context_mapped_total",
            "transport" => kind.as_str(),
            "source" => source.as_str()
        )
        .increment(1);

        let data = RequestData::new(correlation_id)
            .with_causation(resolve_causation_id(self.causation_id))
            .with_tenant(TenantId::parse_optional(self.tenant_id))
            .with_project(ProjectId::parse_optional(self.project_id))
            .with_baggage(baggage);

        let context = node.new_grid_context();
        context.initialize_once(data);
        context
    }
}

/// Values a binder writes, in a transport-independent form.
#[derive(Debug)]
pub(crate) struct OutboundFields {
    pub(crate) standard: Vec<(&'static str, String)>,
    pub(crate) baggage: Baggage,
}

impl OutboundFields {
    /// Gathers outbound values; causation, tenant, and project only when set.
    pub(crate) fn from_context(context: &GridContext) -> Result<Self, TransportError> {
        let data = context.request().map_err(TransportError::MissingContext)?;

        let mut standard = vec![
            (headers::CORRELATION_ID, data.correlation_id.to_string()),
            (headers::NODE_ID, context.node_id().to_string()),
            (headers::STUDIO_ID, context.studio_id().to_string()),
            (headers::ENVIRONMENT, context.environment().to_string()),
        ];
        if let Some(causation) = &data.causation_id {
            standard.push((headers::CAUSATION_ID, causation.to_string()));
        }
        if let Some(tenant) = &data.tenant_id {
            standard.push((headers::TENANT_ID, tenant.to_string()));
        }
        if let Some(project) = &data.project_id {
            standard.push((headers::PROJECT_ID, project.to_string()));
        }

        Ok(Self {
            standard,
            baggage: data.baggage.clone(),
        })
    }

    /// Replaces the managed entries of a string property map.
    pub(crate) fn write_properties(&self, properties: &mut BTreeMap<String, String>) {
        properties.retain(|name, _| !is_managed_name(name));
        for (name, value) in &self.standard {
            properties.insert((*name).to_string(), value.clone());
        }
        for (key, value) in self.baggage.iter() {
            properties.insert(format!("{BAGGAGE_PREFIX}{key}"), value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_names_match_case_insensitively() {
        assert!(is_managed_name("x-correlation-id"));
        assert!(is_managed_name("X-BAGGAGE-userId"));
        assert!(is_managed_name("Baggage"));
        assert!(!is_managed_name("traceparent"));
        assert!(!is_managed_name("content-type"));
    }

    #[test]
    fn collect_keeps_first_value_and_prefixed_entries() {
        let fields = InboundFields::collect([
            ("x-correlation-id", "first"),
            ("X-Correlation-Id", "second"),
            ("X-Baggage-a", "1"),
            ("other", "ignored"),
        ]);
        assert_eq!(fields.correlation_id, Some("first"));
        assert_eq!(fields.prefixed, vec![("X-Baggage-a", "1")]);
        assert!(fields.has_correlation());
    }

    #[test]
    fn blank_correlation_is_not_a_source() {
        let fields = InboundFields::collect([("X-Correlation-Id", "  ")]);
        assert!(!fields.has_correlation());
    }

    #[test]
    fn malformed_traceparent_is_not_a_source() {
        assert!(!InboundFields::collect([("traceparent", "garbage")]).has_correlation());
        assert!(!InboundFields::collect([("traceparent", "00- -x-01")]).has_correlation());
        assert!(InboundFields::collect([(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        )])
        .has_correlation());
    }

    #[test]
    fn write_properties_replaces_previous_binding() {
        let mut properties = BTreeMap::from([
            ("X-Causation-Id".to_string(), "old-op".to_string()),
            ("X-Baggage-stale".to_string(), "1".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ]);
        let mut baggage = Baggage::new();
        baggage.insert("fresh", "2");
        let fields = OutboundFields {
            standard: vec![(headers::CORRELATION_ID, "corr-2".to_string())],
            baggage,
        };
        fields.write_properties(&mut properties);

        assert_eq!(
            properties,
            BTreeMap::from([
                ("X-Correlation-Id".to_string(), "corr-2".to_string()),
                ("X-Baggage-fresh".to_string(), "2".to_string()),
                ("content-type".to_string(), "application/json".to_string()),
            ])
        );
    }
}
