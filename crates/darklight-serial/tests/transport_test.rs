//! Transport behaviour against the simulated instrument

use std::sync::Arc;

use darklight_serial::{codes, Command, SimConfig, SimulatedDevice, Transport, TransportError};

fn transport() -> (Transport<tokio::io::DuplexStream>, SimulatedDevice) {
    let (line, sim) = SimulatedDevice::spawn(SimConfig::default());
    (Transport::new(line).with_label("sim"), sim)
}

#[tokio::test]
async fn test_frame_is_exact() {
    let (transport, sim) = transport();

    let payload = transport
        .send(&Command::new(codes::SET_BRIGHTNESS).with_arg(128))
        .await
        .unwrap();

    assert_eq!(payload, "T");
    assert_eq!(sim.frames(), vec!["T128".to_string()]);
    assert!(sim.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_two_silent_attempts() {
    let (transport, sim) = transport();
    sim.ignore_next(2);

    let payload = transport.send(&Command::new(codes::COVER_STATE)).await.unwrap();

    assert_eq!(payload, "1");
    assert_eq!(sim.frame_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_exhausts_retries() {
    let (transport, sim) = transport();
    sim.set_silent(true);

    let result = transport.send(&Command::new(codes::COVER_STATE)).await;

    assert!(matches!(
        result,
        Err(TransportError::RetriesExhausted { attempts: 3 })
    ));
    assert_eq!(sim.frame_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_budget_is_per_command() {
    let (transport, sim) = transport();
    sim.set_silent(true);

    let result = transport
        .send(&Command::new(codes::HANDSHAKE).with_max_attempts(1))
        .await;

    assert!(matches!(
        result,
        Err(TransportError::RetriesExhausted { attempts: 1 })
    ));
    assert_eq!(sim.frame_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_response_is_retried() {
    let (transport, sim) = transport();
    sim.script_reply("9".repeat(70));

    let payload = transport.send(&Command::new(codes::BRIGHTNESS)).await.unwrap();

    assert_eq!(payload, "0");
    assert_eq!(sim.frame_count(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_never_interleave() {
    let (transport, sim) = transport();
    let transport = Arc::new(transport);

    let expected = [
        (codes::BRIGHTNESS, "0"),
        (codes::COVER_STATE, "1"),
        (codes::MAX_BRIGHTNESS, "255"),
        (codes::CALIBRATOR_STATE, "1"),
        (codes::HEATER_STATE, "1"),
    ];

    let mut tasks = Vec::new();
    for round in 0..4 {
        for (code, reply) in expected {
            let transport = transport.clone();
            tasks.push(tokio::spawn(async move {
                let payload = transport.send(&Command::new(code)).await.unwrap();
                assert_eq!(payload, reply, "round {round} code {code}");
            }));
        }
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(sim.frame_count(), 4 * expected.len());
    assert!(sim.violations().is_empty());
}
