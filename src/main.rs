use actix_web::{App, HttpServer, middleware, web};
use quiz_agent::api::{AppState, configure_routes};
use quiz_agent::banner;
use quiz_agent::config::AppConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Print the startup banner
    banner::print_banner();

    if let Err(e) = dotenvy::dotenv() {
        eprintln!("⚠️  Warning: Could not load .env file: {}", e);
        eprintln!("   Falling back to the process environment");
    }

    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let app_config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load app configuration: {}", e);
            std::process::exit(1);
        }
    };

    let bind = (app_config.bind_addr.clone(), app_config.port);
    log::info!(
        "Plan model {}, run budget {:?}, {} attempts per page",
        app_config.plan_model,
        app_config.policy.max_run,
        app_config.policy.max_attempts
    );
    if let Some(path) = &app_config.event_log {
        log::info!("Event journal: {}", path.display());
    }

    let state = AppState::new(app_config).map_err(std::io::Error::other)?;

    println!("🚀 Starting server on http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind)?
    .run()
    .await
}
