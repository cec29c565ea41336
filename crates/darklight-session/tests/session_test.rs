//! Session lifecycle and polling against the simulated instrument

use std::time::Duration;

use darklight_core::{CalibratorState, CoverState, SessionFlags};
use darklight_serial::{CommandError, SimConfig, SimulatedDevice, Transport, TransportError};
use darklight_session::{poll_once, ConnectError, Session, SessionConfig};
use tokio::io::DuplexStream;

async fn connect(
    sim_config: SimConfig,
    config: SessionConfig,
) -> (Result<Session<DuplexStream>, ConnectError>, SimulatedDevice) {
    let (line, sim) = SimulatedDevice::spawn(sim_config);
    let session = Session::connect(Transport::new(line), config).await;
    (session, sim)
}

#[tokio::test]
async fn test_connect_sequence() {
    let (session, sim) = connect(SimConfig::default(), SessionConfig::default()).await;
    let session = session.unwrap();

    assert_eq!(sim.frames(), vec!["Z", "P", "L", "S2000", "a", "M", "R"]);

    let snapshot = session.dispatcher().snapshot();
    assert_eq!(snapshot.cover, Some(CoverState::Closed));
    assert_eq!(snapshot.calibrator, Some(CalibratorState::Off));
    assert_eq!(snapshot.brightness.max(), 255);
    assert!(snapshot.flags.light_disabled);
}

#[tokio::test]
async fn test_connect_pushes_heat_mode() {
    let config = SessionConfig {
        heat_on_close: true,
        auto_on: true,
        stabilize_time_ms: 4000,
        ..SessionConfig::default()
    };
    let (session, sim) = connect(SimConfig::default(), config).await;
    let session = session.unwrap();

    assert_eq!(sim.frames(), vec!["Z", "P", "L", "S4000", "A", "M", "R", "E"]);
    assert_eq!(sim.heat_modes(), (false, true));
    assert!(session.dispatcher().snapshot().flags.heat_on_close);
}

#[tokio::test]
async fn test_absent_subsystems_skip_setup() {
    let sim_config = SimConfig {
        calibrator_present: false,
        heater_present: false,
        ..SimConfig::default()
    };
    let config = SessionConfig {
        auto_heat: true,
        ..SessionConfig::default()
    };
    let (session, sim) = connect(sim_config, config).await;
    let session = session.unwrap();

    assert_eq!(sim.frames(), vec!["Z", "P", "L", "R"]);
    assert!(!session.dispatcher().snapshot().flags.light_disabled);
}

#[tokio::test]
async fn test_conflicting_heat_modes_never_touch_the_wire() {
    let config = SessionConfig {
        auto_heat: true,
        heat_on_close: true,
        ..SessionConfig::default()
    };
    let (session, sim) = connect(SimConfig::default(), config).await;

    assert!(matches!(session, Err(ConnectError::ConflictingHeatModes)));
    assert_eq!(sim.frame_count(), 0);
}

#[tokio::test]
async fn test_bad_handshake_aborts() {
    let (line, sim) = SimulatedDevice::spawn(SimConfig::default());
    sim.script_reply("Z");

    let result = Session::connect(Transport::new(line), SessionConfig::default()).await;

    assert!(matches!(
        result,
        Err(ConnectError::Handshake(CommandError::Protocol(_)))
    ));
    assert_eq!(sim.frame_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_aborts_connect() {
    let (line, sim) = SimulatedDevice::spawn(SimConfig::default());
    sim.set_silent(true);

    let result = Session::connect(Transport::new(line), SessionConfig::default()).await;

    assert!(matches!(
        result,
        Err(ConnectError::Handshake(CommandError::Transport(
            TransportError::RetriesExhausted { attempts: 3 }
        )))
    ));
    assert_eq!(sim.frame_count(), 3);
}

#[tokio::test]
async fn test_failures_after_handshake_are_tolerated() {
    let (line, sim) = SimulatedDevice::spawn(SimConfig::default());
    sim.script_reply("?");
    sim.script_reply("9");

    let session = Session::connect(Transport::new(line), SessionConfig::default())
        .await
        .unwrap();

    assert_eq!(session.dispatcher().snapshot().cover, None);
    assert_eq!(sim.frame_count(), 7);
}

#[tokio::test]
async fn test_settled_device_polls_nothing() {
    let (session, sim) = connect(SimConfig::default(), SessionConfig::default()).await;
    let session = session.unwrap();
    sim.clear_frames();

    let plan = poll_once(session.dispatcher()).await;

    assert!(plan.is_idle());
    assert_eq!(sim.frame_count(), 0);
}

#[tokio::test]
async fn test_cover_polled_until_settled() {
    let (session, sim) = connect(SimConfig::default(), SessionConfig::default()).await;
    let session = session.unwrap();
    let dispatcher = session.dispatcher();

    dispatcher.open_cover().await.unwrap();
    sim.clear_frames();

    for _ in 0..3 {
        assert!(poll_once(dispatcher).await.cover);
    }
    assert_eq!(sim.frames(), vec!["P", "P", "P"]);
    assert_eq!(dispatcher.snapshot().cover, Some(CoverState::Open));
    assert!(!dispatcher.snapshot().flags.cover_is_moving);

    sim.clear_frames();
    assert!(poll_once(dispatcher).await.is_idle());
    assert_eq!(sim.frame_count(), 0);
}

#[tokio::test]
async fn test_calibrator_polled_until_ready() {
    let (session, sim) = connect(SimConfig::default(), SessionConfig::default()).await;
    let session = session.unwrap();
    let dispatcher = session.dispatcher();

    dispatcher.set_brightness(100).await.unwrap();
    sim.clear_frames();

    for _ in 0..3 {
        assert!(poll_once(dispatcher).await.calibrator);
    }
    assert_eq!(sim.frames(), vec!["L", "B", "L", "B", "L", "B"]);

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.calibrator, Some(CalibratorState::Ready));
    assert_eq!(snapshot.brightness.current(), 100);
    assert!(snapshot.flags.light_is_ready);

    sim.clear_frames();
    assert!(poll_once(dispatcher).await.is_idle());
    assert_eq!(sim.frame_count(), 0);
}

#[tokio::test]
async fn test_heater_polled_until_mode_change_settles() {
    let (session, sim) = connect(SimConfig::default(), SessionConfig::default()).await;
    let session = session.unwrap();
    let dispatcher = session.dispatcher();

    dispatcher.set_auto_heat(true).await.unwrap();
    dispatcher.set_auto_heat(false).await.unwrap();
    assert!(dispatcher.snapshot().flags.heat_mode_is_changing);
    sim.clear_frames();

    assert!(poll_once(dispatcher).await.heater);
    assert!(!dispatcher.snapshot().flags.heat_mode_is_changing);

    sim.clear_frames();
    assert!(poll_once(dispatcher).await.is_idle());
    assert_eq!(sim.frame_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_poller_and_disconnect() {
    let (session, _sim) = connect(SimConfig::default(), SessionConfig::default()).await;
    let mut session = session.unwrap();
    let dispatcher = session.dispatcher().clone();
    let mut updates = session.subscribe();

    session.start_polling();
    assert!(session.is_polling());
    dispatcher.open_cover().await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(updates.borrow_and_update().cover, Some(CoverState::Open));

    session.disconnect().await;

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.cover, None);
    assert_eq!(snapshot.flags, SessionFlags::default());
}
