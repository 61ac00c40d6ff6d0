use hub::Hub;
use log::{error, info};
use service::{config::Config, logging::Logger};

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config);

    info!(
        "Starting chat hub on {} [{}]",
        config.address(),
        config.runtime_env()
    );

    let (hub, hub_handle) = Hub::new();
    let hub_task = tokio::spawn(hub.run());

    let app_state = web::AppState::new(config, hub_handle);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server failed: {e}");
        std::process::exit(1);
    }

    if let Err(e) = hub_task.await {
        error!("Hub control loop terminated abnormally: {e}");
    }

    info!("Chat hub stopped");
}
