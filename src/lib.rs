#[macro_use]
extern crate rocket;

pub mod aggregation;
pub mod api;
pub mod app_state;
pub mod citation;
pub mod config;
pub mod engine;
pub mod error;
pub mod model_registry;
pub mod telemetry;
pub mod types;

use std::sync::Arc;

use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};

use app_state::AppState;
use config::ServiceConfig;
use engine::CandleFactory;
use model_registry::{Capability, ModelRegistry};

/// Routes, catchers and request logging, without any managed state.
pub fn mount(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .attach(telemetry::request_timer())
        .attach(telemetry::request_logger())
        .mount(
            "/",
            routes![
                api::health,
                api::list_models,
                api::load_model,
                api::generate,
                api::ner,
                api::citation_recognize,
            ],
        )
        .register("/", catchers![api::default_catcher])
}

/// A server around an already-built application context.
pub fn with_state(state: Arc<AppState>) -> Rocket<Build> {
    mount(rocket::build()).manage(state)
}

/// The production server: configuration from Rocket's figment, candle-backed handles.
pub fn server() -> Rocket<Build> {
    mount(rocket::build())
        .attach(AdHoc::try_on_ignite("Model handles", |rocket| async move {
            let config = match ServiceConfig::from_figment(rocket.figment()) {
                Ok(config) => config,
                Err(err) => {
                    tracing::error!("invalid service configuration: {err}");
                    return Err(rocket);
                }
            };

            let factory = CandleFactory::new(
                config.model_spec(Capability::Generation),
                config.model_spec(Capability::EntityTagging),
                config.sampling(),
            );
            let registry = ModelRegistry::new(&config.model_specs());
            let state = AppState::new(registry, factory);
            Ok(rocket.manage(state).manage(config))
        }))
        .attach(AdHoc::on_liftoff("Preload models", |rocket| {
            Box::pin(async move {
                let preload = rocket
                    .state::<ServiceConfig>()
                    .map_or(false, |config| config.preload);
                if let (true, Some(state)) = (preload, rocket.state::<Arc<AppState>>()) {
                    let state = state.clone();
                    rocket::tokio::spawn(async move { state.preload().await });
                }
            })
        }))
}
