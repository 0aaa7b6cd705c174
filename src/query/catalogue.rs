/// A PromQL expression with `${matchers}` and `${range}` placeholders and
/// the two label matcher sets that can be substituted into it.
#[derive(Debug)]
pub struct Template {
    pub expr: &'static str,
    /// Matchers narrowing the query to a single entity.
    pub scoped: &'static str,
    /// Matchers selecting every entity.
    pub all: &'static str,
}

/// Longer window average of any base expression.
pub const AVERAGED: &str = "avg_over_time((${expr})[${window}:${range}])";

/// Bytes per second exchanged between pairs of applications, HTTP and TCP.
pub const APP_TRAFFIC: Template = Template {
    expr: concat!(
        "sum(",
        "rate(istio_request_bytes_sum${matchers}[${range}])",
        " + ",
        "rate(istio_response_bytes_sum${matchers}[${range}])",
        ") by (source_app, destination_app)",
        " or ",
        "sum(",
        "rate(istio_tcp_sent_bytes_total${matchers}[${range}])",
        " + ",
        "rate(istio_tcp_received_bytes_total${matchers}[${range}])",
        ") by (source_app, destination_app)",
    ),
    scoped: concat!(
        "{app_group=\"${app_group}\", app=\"${app}\", ",
        "source_app!=\"unknown\", destination_app!=\"unknown\"}",
    ),
    all: concat!(
        "{reporter=\"source\", app_group=\"${app_group}\", ",
        "source_app!=\"unknown\", destination_app!=\"unknown\"}",
    ),
};

/// CPU usage in millicores per application container.
pub const APP_CPU: Template = Template {
    expr: "avg by(container) (rate(container_cpu_usage_seconds_total${matchers}[${range}])) * 1000",
    scoped: "{container=\"${app_group}-${app}\"}",
    all: "{container=~\"${app_group}-.*\"}",
};

/// Working set in MiB per application container.
pub const APP_MEMORY: Template = Template {
    expr: concat!(
        "avg by(container) ",
        "(avg_over_time(container_memory_working_set_bytes${matchers}[${range}]) / (1024 * 1024))",
    ),
    scoped: "{container=\"${app_group}-${app}\"}",
    all: "{container=~\"${app_group}-.*\"}",
};

/// Mean measured latency in milliseconds between pairs of nodes.
pub const NODE_LATENCY: Template = Template {
    expr: concat!(
        "(rate(node_latency_sum${matchers}[${range}])",
        " / ",
        "rate(node_latency_count${matchers}[${range}])) * 1000",
    ),
    scoped: "{origin_node=\"${node}\"}",
    all: "",
};

/// Available memory in MiB per node.
pub const NODE_AVAILABLE_MEMORY: Template = Template {
    expr: concat!(
        "avg by(node_id) ",
        "(avg_over_time(node_memory_MemAvailable_bytes${matchers}[${range}]) / (1024 * 1024))",
    ),
    scoped: "{node_id=\"${node}\"}",
    all: "",
};

/// Idle CPU in millicores per node.
pub const NODE_AVAILABLE_CPU: Template = Template {
    expr: "sum by(node_id) (rate(node_cpu_seconds_total${matchers}[${range}])) * 1000",
    scoped: "{mode=\"idle\", node_id=\"${node}\"}",
    all: "{mode=\"idle\"}",
};
