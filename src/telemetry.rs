use rocket::fairing::AdHoc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "text_pipeline_server=info,rocket=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Logs method, path, status and latency for every response.
pub fn request_logger() -> AdHoc {
    AdHoc::on_response("Request logger", |req, res| {
        Box::pin(async move {
            let elapsed_ms = req
                .local_cache(|| RequestStart(None))
                .0
                .map(|start| start.elapsed().as_millis() as u64);
            tracing::info!(
                method = %req.method(),
                path = %req.uri().path(),
                status = res.status().code,
                elapsed_ms,
                "request handled"
            );
        })
    })
}

/// Stamps each request with its arrival time for [`request_logger`].
pub fn request_timer() -> AdHoc {
    AdHoc::on_request("Request timer", |req, _| {
        Box::pin(async move {
            req.local_cache(|| RequestStart(Some(std::time::Instant::now())));
        })
    })
}

#[derive(Clone, Copy)]
struct RequestStart(Option<std::time::Instant>);
