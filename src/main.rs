use std::sync::Arc;

use pglab::config::Config;
use pglab::entity::StateUpdate;
use pglab::mqtt::{MqttClient, MqttMessage};
use pglab::{Client, Router};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting pglab-mqtt (mqtt={}:{}, client_id={})",
        config.mqtt.broker_host, config.mqtt.broker_port, config.mqtt.client_id,
    );

    // Channels
    let (msg_tx, msg_rx) = mpsc::channel::<MqttMessage>(1024);
    let (update_tx, mut update_rx) = mpsc::channel::<StateUpdate>(256);

    let mqtt_client = MqttClient::new(&config.mqtt);
    let transport = mqtt_client.transport();
    let client = Arc::new(Client::new(transport.clone()));
    let router = Arc::new(Router::new(client, transport.callbacks()).with_listener(update_tx));
    let devices = router.devices();

    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(msg_tx).await;
    });
    let router_handle = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            router.run(msg_rx).await;
        })
    };

    if let Some(name) = &config.discovery.device {
        match devices.wait_for(name, config.discovery.timeout()).await {
            Some(device) => info!(
                "Device {} ready: {} relays, {} shutters, sensors={}",
                name,
                device.relays().len(),
                device.shutters().len(),
                device.sensors().map_or(0, |s| s.size()),
            ),
            None => warn!(
                "Device {} not discovered within {}s",
                name, config.discovery.timeout_secs
            ),
        }
    }

    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::process::exit(1);
            }
        };

    loop {
        tokio::select! {
            Some(update) = update_rx.recv() => {
                info!("{} -> {}", update.entity, update.payload);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    for device in devices.all() {
        if let Err(e) = device.unsubscribe_all().await {
            warn!("Failed to release {:?}: {}", device.name(), e);
        }
    }
    router_handle.abort();
    mqtt_handle.abort();
    info!("pglab-mqtt stopped");
}
