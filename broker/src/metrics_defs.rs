//! Metric definitions for the broker. No recorder is installed here; the
//! deployment wires one up through the `metrics` facade.

pub struct MetricDef {
    pub name: &'static str,
    #[allow(dead_code)]
    pub description: &'static str,
}

pub const REQUESTS_SERVED: MetricDef = MetricDef {
    name: "broker.requests.served",
    description: "Requests that matched a route binding",
};

pub const KEYS_LOADED: MetricDef = MetricDef {
    name: "broker.keys.loaded",
    description: "Keys handed to the dispatcher across all batches",
};

pub const BATCHES_FAILED: MetricDef = MetricDef {
    name: "broker.batches.failed",
    description: "Batches whose flush or merge failed",
};

#[allow(dead_code)]
pub const ALL_METRICS: &[MetricDef] = &[REQUESTS_SERVED, KEYS_LOADED, BATCHES_FAILED];
