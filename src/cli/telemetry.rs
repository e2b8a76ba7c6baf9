//! Subscriber bootstrap: an `EnvFilter`, a pretty or JSON `fmt` layer and,
//! when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, an OTLP (gRPC) span exporter.

use anyhow::{anyhow, Result};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{collections::HashMap, env::var, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};
use ulid::Ulid;

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Dependencies that stay quiet whatever the requested verbosity.
const QUIET_TARGETS: [&str; 7] = [
    "hyper=error",
    "h2=error",
    "tokio=error",
    "tonic=error",
    "reqwest=warn",
    "sqlx=warn",
    "opentelemetry_sdk=warn",
];

/// Targets that always follow the requested level, even under `RUST_LOG`.
const SERVICE_TARGETS: [&str; 2] = [env!("CARGO_CRATE_NAME"), "tower_http"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human readable output.
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Build the filter: `RUST_LOG` (default ERROR) for everything, dependency
/// noise capped, and this service pinned to `level`.
fn env_filter(level: Level) -> Result<EnvFilter> {
    let level = level.as_str().to_ascii_lowercase();
    let mut filter = EnvFilter::builder()
        .with_default_directive(Level::ERROR.into())
        .from_env_lossy();
    for directive in QUIET_TARGETS {
        filter = filter.add_directive(directive.parse()?);
    }
    for target in SERVICE_TARGETS {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }
    Ok(filter)
}

fn fmt_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .with_target(false)
            .pretty()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .flatten_event(true)
            .boxed(),
    }
}

/// Collector connection read from the standard `OTEL_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    headers: HashMap<String, String>,
    instance_id: String,
}

impl OtlpSettings {
    /// `None` when no collector endpoint is configured.
    fn from_env() -> Option<Self> {
        let endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty())?;
        Some(Self {
            endpoint: normalize_endpoint(&endpoint),
            headers: var("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|headers| parse_header_pairs(&headers))
                .unwrap_or_default(),
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        })
    }

    /// Host to verify the collector certificate against, for `https` endpoints.
    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .and_then(|authority| authority.split(':').next())
            .filter(|host| !host.is_empty())
    }
}

fn parse_header_pairs(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

// Keys ending in "-bin" carry base64-encoded binary values.
fn headers_to_metadata(headers: &HashMap<String, String>) -> Result<MetadataMap> {
    let mut meta = MetadataMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        if name.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|e| anyhow!("failed to base64-decode value for key {name}: {e}"))?;
            let key = MetadataKey::<Binary>::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("invalid binary metadata key {name}: {e}"))?;
            meta.insert_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let key = MetadataKey::<Ascii>::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("invalid ASCII metadata key {name}: {e}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("invalid ASCII metadata value for key {name}: {e}"))?;
            meta.insert(key, value);
        }
    }
    Ok(meta)
}

fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

/// Resource attributes identifying this process to the collector.
fn resource(instance_id: &str) -> Resource {
    Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance_id.to_string()),
            KeyValue::new("vcs.ref.head.revision", crate::GIT_COMMIT_HASH),
        ])
        .build()
}

fn init_tracer(settings: &OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(Duration::from_secs(3));
    if let Some(domain) = settings.tls_domain() {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.to_string())
                .with_native_roots(),
        );
    }
    if !settings.headers.is_empty() {
        builder = builder.with_metadata(headers_to_metadata(&settings.headers)?);
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(resource(&settings.instance_id))
        .build();
    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));
    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber.
///
/// `level` defaults to ERROR for this service.
///
/// # Errors
///
/// Returns an error if the filter, the exporter or the subscriber cannot be
/// initialized.
pub fn init(level: Option<Level>, format: LogFormat) -> Result<()> {
    let filter = env_filter(level.unwrap_or(Level::ERROR))?;
    let otel_layer = match OtlpSettings::from_env() {
        Some(settings) => Some(tracing_opentelemetry::layer().with_tracer(init_tracer(&settings)?)),
        None => None,
    };

    let subscriber = Registry::default()
        .with(fmt_layer(format))
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Flush and shut down the tracer provider (noop if not initialized).
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};

    #[test]
    fn filter_pins_service_and_quiets_dependencies() -> Result<()> {
        temp_env::with_var("RUST_LOG", Some("warn"), || {
            let rendered = env_filter(Level::DEBUG)?.to_string().to_lowercase();
            assert!(rendered.contains("authgate=debug"), "{rendered}");
            assert!(rendered.contains("tower_http=debug"), "{rendered}");
            assert!(rendered.contains("reqwest=warn"), "{rendered}");
            assert!(rendered.contains("sqlx=warn"), "{rendered}");
            Ok(())
        })
    }

    #[test]
    fn resource_identifies_this_build() {
        let resource = resource("instance-1");
        let get = |key: &'static str| resource.get(&Key::from_static_str(key));
        assert_eq!(get("service.name"), Some(Value::from("authgate")));
        assert_eq!(get("service.version"), Some(Value::from(env!("CARGO_PKG_VERSION"))));
        assert_eq!(get("service.instance.id"), Some(Value::from("instance-1")));
        assert_eq!(get("vcs.ref.head.revision"), Some(Value::from(crate::GIT_COMMIT_HASH)));
    }

    #[test]
    fn otlp_settings_only_with_endpoint() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", None::<&str>),
                ("OTEL_EXPORTER_OTLP_HEADERS", None),
            ],
            || assert_eq!(OtlpSettings::from_env(), None),
        );

        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("collector.test:4317/")),
                ("OTEL_EXPORTER_OTLP_HEADERS", Some("x-api-key = k1,malformed")),
                ("OTEL_SERVICE_INSTANCE_ID", Some("pod-7")),
            ],
            || {
                let settings = OtlpSettings::from_env();
                let Some(settings) = settings else {
                    panic!("expected settings");
                };
                assert_eq!(settings.endpoint, "https://collector.test:4317");
                assert_eq!(settings.tls_domain(), Some("collector.test"));
                assert_eq!(settings.instance_id, "pod-7");
                assert_eq!(settings.headers.len(), 1);
                assert_eq!(settings.headers.get("x-api-key").map(String::as_str), Some("k1"));
            },
        );
    }

    #[test]
    fn plain_http_endpoint_skips_tls() {
        let settings = OtlpSettings {
            endpoint: normalize_endpoint("http://localhost:4317"),
            headers: HashMap::new(),
            instance_id: "local".to_string(),
        };
        assert_eq!(settings.endpoint, "http://localhost:4317");
        assert_eq!(settings.tls_domain(), None);
    }

    #[test]
    fn headers_to_metadata_accepts_ascii_and_binary() -> Result<()> {
        let headers = parse_header_pairs("authorization=Bearer token123,custom-bin=YmluYXJ5IGRhdGE=");
        let metadata = headers_to_metadata(&headers)?;
        assert_eq!(metadata.len(), 2);

        let invalid = parse_header_pairs("custom-bin=not-valid-base64!!!");
        assert!(headers_to_metadata(&invalid)
            .is_err_and(|err| err.to_string().contains("failed to base64-decode")));
        Ok(())
    }

    #[test]
    fn shutdown_without_provider_is_noop() {
        shutdown_tracer();
    }
}
