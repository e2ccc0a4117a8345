#[rocket::launch]
fn rocket() -> _ {
    text_pipeline_server::telemetry::init();
    tracing::info!("text-pipeline-server v{}", env!("CARGO_PKG_VERSION"));
    text_pipeline_server::server()
}
