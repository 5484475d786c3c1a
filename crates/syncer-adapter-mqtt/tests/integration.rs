use serde::{Deserialize, Serialize};
use std::time::Duration;
use syncer::{Client, PatchOp, PatchOpRouter, Server};
use syncer_adapter_mqtt::{MqttBackend, MqttConfig, MqttParams};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Data {
    counter: u64,
}

fn backend() -> Option<MqttBackend> {
    if std::env::var("SYNCER_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set SYNCER_INTEGRATION=1 to run");
        return None;
    }

    let broker = std::env::var("SYNCER_MQTT_BROKER")
        .unwrap_or_else(|_| "tcp://localhost:1883".to_string());
    let tenant = format!("it-{}", Uuid::new_v4().simple());
    Some(MqttBackend::new(MqttConfig::new(broker).with_tenant(tenant)).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mqtt_state_roundtrip() {
    let Some(backend) = backend() else {
        return;
    };
    let params = MqttParams::new("state");

    let server = Server::bind_shared(&backend, &params, &Data { counter: 1 })
        .await
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut router = PatchOpRouter::new();
    router
        .add_callback("/counter", PatchOp::Replace, move |_: &Data, _, _, value: Option<u64>| {
            let _ = tx.send(value);
        })
        .unwrap();

    let client = Client::connect_shared(&backend, &params, router).await.unwrap();
    timeout(Duration::from_secs(5), async {
        while !client.is_synced() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(client.data().unwrap(), Data { counter: 1 });
    assert_eq!(rx.recv().await.unwrap(), Some(1));

    // Let the resync beacon pass
    sleep(backend.config().connect_period * 2).await;
    while rx.try_recv().is_ok() {}

    assert_eq!(server.update(&Data { counter: 2 }).await, Some(1));
    let routed = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(routed, Some(Some(2)));
    assert_eq!(client.version(), Some(1));

    client.shutdown().await;
    server.shutdown().await;
}
