use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::RwLock;

use catcoin::api::{self, ApiDoc};
use catcoin::config;
use catcoin::Blockchain;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = config::load_config().context("Failed to load configuration")?;
    info!(
        "Starting ledger with difficulty {} and mining reward {}",
        config.chain.difficulty, config.chain.mining_reward
    );

    // The only ledger in the process; workers share it through this handle
    let blockchain = Blockchain::with_config(config.chain).context("Invalid chain configuration")?;
    let ledger = web::Data::new(RwLock::new(blockchain));

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server at http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi())
            )
    })
    .bind(bind)
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server failed")?;

    Ok(())
}
