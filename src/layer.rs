//! `tracing` integration
//!
//! [`ShipperLayer`] turns every event seen by the subscriber into a JSON
//! record and submits it to a [`LogShipper`]. Events from this crate and
//! from the HTTP stack are skipped; shipping them would feed the shipper its
//! own traffic.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::shipper::LogShipper;

const SKIPPED_TARGETS: &[&str] = &["logship", "reqwest", "hyper", "hyper_util", "h2", "rustls", "tower"];

pub struct ShipperLayer {
    shipper: Arc<LogShipper>,
}

impl ShipperLayer {
    pub fn new(shipper: Arc<LogShipper>) -> Self {
        Self { shipper }
    }
}

fn is_skipped(target: &str) -> bool {
    SKIPPED_TARGETS.iter().any(|skipped| {
        target == *skipped
            || target
                .strip_prefix(skipped)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

impl<S: Subscriber> Layer<S> for ShipperLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_skipped(metadata.target()) {
            return;
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let entry = serde_json::json!({
            "level": metadata.level().as_str(),
            "target": metadata.target(),
            "message": visitor.message.unwrap_or_default(),
            "fields": visitor.fields,
        });

        // Refusals are counted in the shipper's metrics; a logging layer has nowhere to report them.
        let _ = self.shipper.submit_entry(&entry);
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }
}
