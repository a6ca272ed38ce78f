//! A small axum service exercising the telemetry pipeline end to end:
//! request middleware feeding the HTTP metrics, span-scoped business
//! work with correlated logs, an intentionally failing endpoint for the
//! error path, and flush-before-exit on termination signals.

use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use telepipe::logs::Logger;
use telepipe::metrics::{Counter, Histogram, UpDownCounter};
use telepipe::trace::{Status, Tracer};
use telepipe::{KeyValue, TelemetryConfig};

#[derive(Clone)]
struct AppState {
    tracer: Tracer,
    logger: Logger,
    http_requests: Counter,
    request_duration: Histogram,
    business_operations: Counter,
    active_connections: UpDownCounter,
    development: bool,
    service_name: String,
    service_version: String,
}

fn main() {
    let config = TelemetryConfig::from_env();

    // Telemetry comes up before the runtime: the process must not serve
    // requests with a partially initialized pipeline.
    let pipeline = match telepipe::init(config.clone()) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("failed to initialize telemetry: {err}");
            std::process::exit(1);
        }
    };

    let meter = pipeline.meter();
    let started = Instant::now();
    let _uptime = meter.create_observable_gauge(
        "process_uptime_seconds",
        "Seconds since process start",
        move |observer| {
            observer.observe(started.elapsed().as_secs_f64(), &[]);
        },
    );

    let state = AppState {
        tracer: pipeline.tracer(),
        logger: pipeline.logger(),
        http_requests: meter.create_counter("http_requests_total", "Total number of HTTP requests"),
        request_duration: meter.create_histogram(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0],
        ),
        business_operations: meter.create_counter(
            "business_operations_total",
            "Total number of business operations",
        ),
        active_connections: meter
            .create_up_down_counter("active_connections", "Number of active connections"),
        development: config.is_development(),
        service_name: config.service_name.clone(),
        service_version: config.service_version.clone(),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };
    runtime.block_on(serve(state, config.port));

    if let Err(err) = telepipe::shutdown_global() {
        eprintln!("telemetry shutdown error: {err}");
    }
}

async fn serve(state: AppState, port: u16) {
    let logger = state.logger.clone();
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/process", post(process))
        .route("/api/error", get(simulated_error))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            observe_requests,
        ))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            logger.fatal(
                format!("failed to bind {addr}: {err}"),
                vec![KeyValue::new("port", i64::from(port))],
            );
            return;
        }
    };
    logger.info(
        format!("Server started on port {port}"),
        vec![KeyValue::new("port", i64::from(port))],
    );

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        logger.error(format!("server error: {err}"), vec![]);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Wraps every request: measures its duration and feeds the HTTP
/// request counter and duration histogram.
async fn observe_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request.uri().path().to_owned();
    state.active_connections.add(1.0, &[]);
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    state.active_connections.add(-1.0, &[]);
    let status_code = response.status().as_u16();
    let labels = [
        KeyValue::new("method", method.clone()),
        KeyValue::new("route", route.clone()),
        KeyValue::new("status_code", status_code.to_string()),
    ];
    let _ = state.http_requests.add(1.0, &labels);
    state
        .request_duration
        .record(duration.as_secs_f64(), &labels);
    state.logger.info(
        "Request completed",
        vec![
            KeyValue::new("method", method),
            KeyValue::new("url", route),
            KeyValue::new("status_code", i64::from(status_code)),
            KeyValue::new("duration_ms", duration.as_millis() as i64),
        ],
    );
    response
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": epoch_seconds(),
        "service": state.service_name,
        "version": state.service_version,
    }))
}

async fn process(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let payload_size = body.to_string().len();
    let worker_state = state.clone();

    // Span-scoped work runs on one blocking thread so the thread-local
    // context stays valid for the span's whole lifetime.
    let result = tokio::task::spawn_blocking(move || {
        worker_state.tracer.in_span("process-data", |cx| {
            cx.span().set_attributes([
                KeyValue::new("operation.type", "data-processing"),
                KeyValue::new("data.size", payload_size as i64),
            ]);
            simulate_processing();
            worker_state.logger.info(
                "Data processed successfully",
                vec![KeyValue::new("data.size", payload_size as i64)],
            );
        });
    })
    .await;

    match result {
        Ok(()) => {
            let _ = state.business_operations.add(
                1.0,
                &[
                    KeyValue::new("operation", "data-processing"),
                    KeyValue::new("success", "true"),
                ],
            );
            Json(json!({
                "success": true,
                "processedAt": epoch_seconds(),
                "dataSize": payload_size,
            }))
            .into_response()
        }
        Err(err) => {
            let _ = state.business_operations.add(
                1.0,
                &[
                    KeyValue::new("operation", "data-processing"),
                    KeyValue::new("success", "false"),
                ],
            );
            state
                .logger
                .error(format!("processing task failed: {err}"), vec![]);
            error_response(&state, "processing task failed")
        }
    }
}

#[derive(Debug)]
struct SimulatedError;

impl fmt::Display for SimulatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Simulated error for testing")
    }
}

impl Error for SimulatedError {}

async fn simulated_error(State(state): State<AppState>) -> Response {
    let worker_state = state.clone();
    let _ = tokio::task::spawn_blocking(move || {
        worker_state.tracer.in_span("simulated-error", |cx| {
            let err = SimulatedError;
            cx.span().record_error(&err);
            cx.span().set_status(Status::error(err.to_string()));
            worker_state.logger.error(
                "Request error",
                vec![
                    KeyValue::new("url", "/api/error"),
                    KeyValue::new("error", err.to_string()),
                ],
            );
        });
    })
    .await;

    error_response(&state, &SimulatedError.to_string())
}

/// Production hides failure details; development exposes them.
fn error_response(state: &AppState, raw_message: &str) -> Response {
    let message = if state.development {
        raw_message.to_owned()
    } else {
        "Something went wrong".to_owned()
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal Server Error", "message": message })),
    )
        .into_response()
}

fn simulate_processing() {
    // Stand-in for real work; keep it short but measurable.
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64
        % 40;
    std::thread::sleep(Duration::from_millis(10 + jitter));
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
