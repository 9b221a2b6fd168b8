use actix::Actor;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod arbiter;
mod auth;
mod config;
mod db;
mod error;
mod gateway;
mod matcher;
mod proposals;
mod rooms;
mod schemas;
mod similarity;
mod wallet;

use crate::arbiter::ArbiterClient;
use crate::config::Config;
use crate::db::Store;
use crate::gateway::StripeClient;
use crate::rooms::RoomServer;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();

    let store = Store::connect(&config.mongodb_uri)
        .await
        .expect("failed to connect to MongoDB");
    info!("connected to MongoDB");

    // The matcher cannot run without embeddings, so a failed warm-up is
    // fatal here rather than a per-request surprise later.
    similarity::shared_engine(&config)
        .await
        .expect("failed to initialize the embedding capability");

    let http = reqwest::Client::new();
    let stripe = StripeClient::new(http.clone(), config.stripe_secret_key.clone());
    let arbiter = ArbiterClient::new(http, config.gemini_api_key.clone());
    let rooms = RoomServer::new().start();

    let port = config.port;
    let config = web::Data::new(config);
    info!(port, "listening");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(store.clone()))
            .app_data(config.clone())
            .app_data(web::Data::new(stripe.clone()))
            .app_data(web::Data::new(arbiter.clone()))
            .app_data(web::Data::new(rooms.clone()))
            .service(auth::signup)
            .service(auth::login)
            .service(matcher::match_user)
            .service(wallet::get_balance)
            .service(wallet::create_payment_intent)
            .service(wallet::verify_contribution)
            .service(proposals::create_proposal)
            .service(proposals::list_proposals)
            .service(proposals::vote)
            .service(proposals::finalize)
            .service(rooms::ws_entry)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
