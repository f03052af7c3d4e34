use std::{collections::HashMap, time::Duration};

use color_eyre::eyre::WrapErr;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::Tracer, Resource};
use sentry::ClientInitGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

pub fn setup_sentry() -> Option<ClientInitGuard> {
    let release_name = sentry::release_name!()
        .unwrap_or_else(|| concat!("idx-login@", env!("CARGO_PKG_VERSION")).into());

    match std::env::var("SENTRY_DSN") {
        Ok(sentry_dsn) => {
            println!("Sentry enabled");

            Some(sentry::init((
                sentry_dsn,
                sentry::ClientOptions {
                    traces_sample_rate: 0.5,
                    release: Some(release_name),
                    ..Default::default()
                },
            )))
        }
        Err(_) => {
            println!("Sentry not configured in this environment");
            None
        }
    }
}

pub fn setup_tracing(crate_name: &str) -> color_eyre::Result<()> {
    let rust_log = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("info,{crate_name}=debug,tower_http=debug"));

    let env_filter = EnvFilter::builder()
        .parse(&rust_log)
        .wrap_err_with(|| format!("Couldn't create env filter from {rust_log}"))?;

    let hierarchical = HierarchicalLayer::default()
        .with_writer(std::io::stdout)
        .with_indent_lines(true)
        .with_indent_amount(2)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_verbose_exit(true)
        .with_verbose_entry(true)
        .with_targets(true);

    let opentelemetry_layer = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => {
            let tracer = otlp_tracer(crate_name, &endpoint)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        Err(_) => None,
    };

    Registry::default()
        .with(hierarchical)
        .with(opentelemetry_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

fn otlp_tracer(service_name: &str, endpoint: &str) -> color_eyre::Result<Tracer> {
    let mut headers = HashMap::<String, String>::new();
    if let Ok(honeycomb_key) = std::env::var("HONEYCOMB_API_KEY") {
        headers.insert("x-honeycomb-team".to_string(), honeycomb_key);
    }

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(endpoint)
                .with_headers(headers)
                .with_timeout(Duration::from_secs(3)),
        )
        .with_trace_config(opentelemetry_sdk::trace::config().with_resource(Resource::new(
            vec![KeyValue::new("service.name", service_name.to_owned())],
        )))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .wrap_err("Failed to install the OTLP trace pipeline")?;

    Ok(tracer)
}
