use edgegate_core::metrics::MetricsSink;
use edgegate_prometheus::PrometheusSink;
use prometheus::Registry;

fn counter_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let families = registry.gather();
    let family = families.iter().find(|mf| mf.get_name() == name)?;
    family
        .get_metric()
        .iter()
        .find(|m| {
            labels.iter().all(|(label_name, label_value)| {
                m.get_label()
                    .iter()
                    .any(|l| l.get_name() == *label_name && l.get_value() == *label_value)
            })
        })
        .map(|m| m.get_counter().value())
}

#[test]
fn requests_total_increments_per_service_and_method() {
    let registry = Registry::new();
    let sink = PrometheusSink::new(registry.clone()).expect("sink registers cleanly");

    sink.incr_requests("core", "GET");
    sink.incr_requests("core", "GET");
    sink.incr_requests("core", "POST");

    assert_eq!(counter_value(&registry, "gateway_requests_total", &[("service", "core"), ("method", "GET")]), Some(2.0));
    assert_eq!(counter_value(&registry, "gateway_requests_total", &[("service", "core"), ("method", "POST")]), Some(1.0));
}

#[test]
fn circuit_state_gauge_reflects_last_write() {
    let registry = Registry::new();
    let sink = PrometheusSink::new(registry.clone()).expect("sink registers cleanly");

    sink.set_circuit_state("core", true);
    let families = registry.gather();
    let gauge_family = families.iter().find(|mf| mf.get_name() == "gateway_circuit_state").unwrap();
    let value = gauge_family.get_metric()[0].get_gauge().value();
    assert_eq!(value, 1.0);

    sink.set_circuit_state("core", false);
    let families = registry.gather();
    let gauge_family = families.iter().find(|mf| mf.get_name() == "gateway_circuit_state").unwrap();
    let value = gauge_family.get_metric()[0].get_gauge().value();
    assert_eq!(value, 0.0);
}

#[test]
fn export_contains_all_three_series_names() {
    let registry = Registry::new();
    let sink = PrometheusSink::new(registry).expect("sink registers cleanly");
    sink.incr_requests("core", "GET");
    sink.observe_latency("core", 0.01);
    sink.set_circuit_state("core", false);

    let body = sink.export();
    assert!(body.contains("gateway_requests_total"));
    assert!(body.contains("gateway_request_latency_seconds"));
    assert!(body.contains("gateway_circuit_state"));
}
