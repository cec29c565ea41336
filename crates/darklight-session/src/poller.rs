//! Background state polling

use std::sync::Arc;
use std::time::Duration;

use darklight_core::{DeviceModel, HeaterMode};
use darklight_serial::{Dispatcher, Link};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

/// What a single poll cycle will refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollPlan {
    pub cover: bool,
    /// Calibrator state and brightness together
    pub calibrator: bool,
    pub heater: bool,
}

impl PollPlan {
    /// Only fields that are unsettled (or never observed) are refreshed
    pub fn from_model(model: &DeviceModel) -> Self {
        let flags = model.flags();
        Self {
            cover: model.cover_present()
                && (flags.cover_is_moving || model.cover_state().is_none()),
            calibrator: model.calibrator_present() && !flags.light_is_ready,
            heater: model.heater_present()
                && (model.heater_mode() != HeaterMode::Off || flags.heat_mode_is_changing),
        }
    }

    pub fn is_idle(&self) -> bool {
        !(self.cover || self.calibrator || self.heater)
    }
}

/// Run one poll cycle and return the plan it followed
pub async fn poll_once<S: Link>(dispatcher: &Dispatcher<S>) -> PollPlan {
    let plan = dispatcher.with_model(PollPlan::from_model).await;
    if plan.is_idle() {
        return plan;
    }

    if plan.cover {
        if let Err(e) = dispatcher.get_cover_state().await {
            warn!(error = %e, "Cover poll failed");
        }
    }
    if plan.calibrator {
        if let Err(e) = dispatcher.get_calibrator_state().await {
            warn!(error = %e, "Calibrator poll failed");
        }
        if let Err(e) = dispatcher.get_brightness().await {
            warn!(error = %e, "Brightness poll failed");
        }
    }
    if plan.heater {
        if let Err(e) = dispatcher.get_heater_state().await {
            warn!(error = %e, "Heater poll failed");
        }
    }
    plan
}

pub struct Poller<S> {
    dispatcher: Arc<Dispatcher<S>>,
    interval: Duration,
}

impl<S: Link> Poller<S> {
    pub fn new(dispatcher: Arc<Dispatcher<S>>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }

    /// Poll until `shutdown` fires or its sender is dropped.
    ///
    /// The next cycle is armed only after the previous one finished, and
    /// shutdown is only observed between cycles.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "State poller started");

        loop {
            let plan = poll_once(&self.dispatcher).await;
            trace!(?plan, "Poll cycle complete");

            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    debug!("Poller shutdown requested");
                    break;
                }
            }
        }

        info!("State poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use darklight_core::{CalibratorState, CoverCommand, CoverState, HeaterState, Outcome};

    fn settled() -> DeviceModel {
        let mut model = DeviceModel::new();
        model.apply(Outcome::CoverReport(CoverState::Closed));
        model.apply(Outcome::CalibratorReport(CalibratorState::Off));
        model.apply(Outcome::HeaterReport(HeaterState::Off));
        model
    }

    #[test]
    fn test_fresh_model_polls_cover_and_heater() {
        let plan = PollPlan::from_model(&DeviceModel::new());
        assert!(plan.cover);
        assert!(!plan.calibrator);
        assert!(!plan.heater);
    }

    #[test]
    fn test_settled_model_is_idle() {
        assert!(PollPlan::from_model(&settled()).is_idle());
    }

    #[test]
    fn test_moving_cover_is_polled() {
        let mut model = settled();
        model.apply(Outcome::CoverCommanded(CoverCommand::Open));
        assert!(PollPlan::from_model(&model).cover);

        model.apply(Outcome::CoverReport(CoverState::Open));
        assert!(!PollPlan::from_model(&model).cover);
    }

    #[test]
    fn test_absent_cover_never_polled() {
        let mut model = settled();
        model.apply(Outcome::CoverReport(CoverState::NotPresent));
        model.apply(Outcome::CoverCommanded(CoverCommand::Open));
        assert!(!PollPlan::from_model(&model).cover);
    }

    #[test]
    fn test_brightness_change_polls_calibrator_until_ready() {
        let mut model = settled();
        model.apply(Outcome::BrightnessCommanded(100));
        assert!(PollPlan::from_model(&model).calibrator);

        model.apply(Outcome::CalibratorReport(CalibratorState::NotReady));
        assert!(PollPlan::from_model(&model).calibrator);

        model.apply(Outcome::CalibratorReport(CalibratorState::Ready));
        assert!(PollPlan::from_model(&model).is_idle());
    }

    #[test]
    fn test_heater_polled_while_active_or_changing() {
        let mut model = settled();
        model.apply(Outcome::AutoHeat(true));
        assert!(PollPlan::from_model(&model).heater);

        model.apply(Outcome::HeaterReport(HeaterState::Auto));
        assert!(PollPlan::from_model(&model).heater);

        model.apply(Outcome::AutoHeat(false));
        model.apply(Outcome::HeaterReport(HeaterState::Off));
        assert!(!PollPlan::from_model(&model).heater);
    }

    #[test]
    fn test_absent_heater_never_polled() {
        let mut model = settled();
        model.apply(Outcome::HeaterReport(HeaterState::NotPresent));
        model.apply(Outcome::HeatOnClose(true));
        assert!(!PollPlan::from_model(&model).heater);
    }
}
