//! gRPC trace context propagation utilities
//!
//! Injects W3C Trace Context headers into the metadata of outgoing agent
//! calls so that agent-side spans join the server's trace.
//!
//! # W3C Trace Context
//!
//! The trace context is propagated via two metadata keys:
//! - `traceparent`: Contains trace ID, span ID, and flags
//! - `tracestate`: Contains vendor-specific trace information
//!
//! Format: `00-{trace_id}-{span_id}-{trace_flags}`
//!
//! # Example
//!
//! ```ignore
//! use heron_proto::tracing::inject_context;
//!
//! let mut request = tonic::Request::new(GetStateReq {});
//! inject_context(request.metadata_mut());
//! client.get_state(request).await?;
//! ```

use opentelemetry::propagation::Injector;
use opentelemetry::{global, Context};
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};

/// Carrier for injecting trace context into gRPC metadata
struct MetadataInjector<'a> {
    metadata: &'a mut MetadataMap,
}

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let key = key.to_lowercase();
        if key != "traceparent" && key != "tracestate" {
            return;
        }
        let (Ok(key), Ok(value)) = (
            MetadataKey::from_bytes(key.as_bytes()),
            MetadataValue::try_from(value.as_str()),
        ) else {
            return;
        };
        self.metadata.insert(key, value);
    }
}

/// Inject the current trace context into outgoing request metadata
///
/// Uses the global text map propagator (typically W3C TraceContext). Without
/// a configured propagator this is a no-op.
pub fn inject_context(metadata: &mut MetadataMap) {
    let cx = Context::current();
    global::get_text_map_propagator(|propagator| {
        let mut injector = MetadataInjector { metadata };
        propagator.inject_context(&cx, &mut injector);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_without_propagator_is_noop() {
        let mut metadata = MetadataMap::new();
        inject_context(&mut metadata);
        assert!(!metadata.contains_key("traceparent"));
    }

    #[test]
    fn test_injector_ignores_unknown_keys() {
        let mut metadata = MetadataMap::new();
        let mut injector = MetadataInjector {
            metadata: &mut metadata,
        };
        injector.set("baggage", "k=v".to_string());
        injector.set("traceparent", "00-a-b-01".to_string());
        assert!(!metadata.contains_key("baggage"));
        assert!(metadata.contains_key("traceparent"));
    }
}
