//! Service boot against the in-memory bus, without a trained model.

use std::thread;
use std::time::Duration;

use voxnlu_bus::{AckOutcome, InMemoryBus, MessageBus};
use voxnlu_engine::EngineState;
use voxnlu_service::{App, ServiceConfig};

fn config(dir: &std::path::Path) -> ServiceConfig {
    ServiceConfig {
        rasa_path: dir.to_path_buf(),
        rasa_bin: "/definitely/not/rasa".to_string(),
        ..ServiceConfig::default()
    }
}

fn wait_for_acks(bus: &InMemoryBus, n: usize) {
    for _ in 0..200 {
        if bus.acks().len() >= n {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {n} settlements");
}

#[test]
fn boots_without_model_and_rejects_queries() {
    let dir = tempfile::tempdir().unwrap();
    let bus = InMemoryBus::new();
    let app = App::start_with_bus(&config(dir.path()), bus.clone()).unwrap();

    assert_eq!(app.manager().state().unwrap(), EngineState::Stopped);
    assert!(dir.path().join("config.yml").exists());

    bus.publish("intents", "intents.upsert", br#"{"intent":"greet","examples":["hello"]}"#.to_vec())
        .unwrap();
    bus.publish("intents", "intents.request.web", br#"{"text":"hello"}"#.to_vec())
        .unwrap();
    wait_for_acks(&bus, 2);

    assert!(app.registry().get("greet").is_some());
    let outcomes: Vec<AckOutcome> = bus.acks().into_iter().map(|a| a.outcome).collect();
    assert!(outcomes.contains(&AckOutcome::Ack));
    assert!(outcomes.contains(&AckOutcome::Nack { requeue: false }));

    app.shutdown();
}

#[test]
fn engine_spawn_failure_is_fatal_when_a_model_exists() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let model = cfg.engine_config().model_path();
    std::fs::create_dir_all(model.parent().unwrap()).unwrap();
    std::fs::write(&model, b"model").unwrap();

    let err = App::start_with_bus(&cfg, InMemoryBus::new()).err().unwrap();
    assert!(format!("{err:#}").contains("failed to spawn engine"));
}
