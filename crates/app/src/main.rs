mod cli;
mod diag;
mod hardware;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use inspection::{
    CommandListener, CycleSettings, CycleState, InspectionConfig, InspectionController,
    SharedControl, TimingSettings, telemetry, wait_for_start,
};
use tracing::{debug, error, info, warn};

use crate::{
    cli::{Cli, CommandKind},
    hardware::Cell,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::enter_runtime(&cli.command.telemetry());

    let control = Arc::new(SharedControl::new());
    install_signal_handler(&control);

    match cli.command {
        CommandKind::Run(args) => {
            let config = InspectionConfig::try_from(args)?;
            run_cell(&config, control)
        }
        CommandKind::Diag(args) => diag::run(args, control),
    }
}

/// SIGINT/SIGTERM only flip the lock-free signal flag.
fn install_signal_handler(control: &Arc<SharedControl>) {
    let handler_control = Arc::clone(control);
    if let Err(err) = ctrlc::set_handler(move || handler_control.signal_shutdown()) {
        warn!("failed to install signal handler: {err}");
    }
}

fn run_cell(config: &InspectionConfig, control: Arc<SharedControl>) -> Result<()> {
    let metrics = telemetry::init_metrics_recorder();
    let settings = CycleSettings::from_config(config)?;
    let cell = Cell::bring_up(config).context("hardware initialisation failed")?;
    let run_result = operate(cell, settings, &config.timings, control);

    debug!("metrics snapshot:\n{}", metrics.render());
    if let Err(err) = &run_result {
        error!("inspection loop failed: {err:#}");
    }
    run_result
}

/// Drive an opened cell until shutdown. The cell is torn down on every path
/// once the command listener has been joined.
fn operate(
    cell: Cell,
    settings: CycleSettings,
    timings: &TimingSettings,
    control: Arc<SharedControl>,
) -> Result<()> {
    let Cell {
        devices,
        display,
        uplink,
        resources,
    } = cell;

    if let Err(err) = display.set_online(true) {
        warn!("failed to mark display online: {err}");
    }
    if let Err(err) = display.show_state(CycleState::Idle) {
        warn!("failed to reset display state: {err}");
    }

    let mut controller = InspectionController::new(
        devices,
        display.clone(),
        uplink,
        Arc::clone(&control),
        settings,
    );

    let run_result = match CommandListener::new(
        display,
        Arc::clone(&control),
        timings.listener_poll(),
    )
    .spawn()
    {
        Ok(listener) => {
            info!("waiting for start command from the operator display");
            let result = if wait_for_start(&control, timings.start_poll()) {
                controller.run().map(|summary| info!(?summary, "inspection finished"))
            } else {
                info!("shutdown requested before start");
                Ok(())
            };
            control.request_shutdown();
            let stats = listener.stop();
            debug!(?stats, "command listener joined");
            result
        }
        Err(err) => Err(anyhow::Error::new(err).context("failed to spawn command listener")),
    };

    let (devices, display, uplink) = controller.into_parts();
    Cell {
        devices,
        display,
        uplink,
        resources,
    }
    .teardown();
    run_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        Event, fast_settings, offline_frame, online_frame, safe_state_sequence, test_cell,
    };

    fn quick_timings() -> TimingSettings {
        TimingSettings {
            start_poll_ms: 5,
            listener_poll_ms: 5,
            ..TimingSettings::default()
        }
    }

    #[test]
    fn conveyor_failure_still_tears_the_cell_down() {
        let fixture = test_cell(true);
        let images = tempfile::tempdir().unwrap();
        let control = Arc::new(SharedControl::new());
        control.request_start();

        let result = operate(
            fixture.cell,
            fast_settings(images.path()),
            &quick_timings(),
            Arc::clone(&control),
        );

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to start conveyor"));
        assert!(control.shutdown_requested());

        let log = &fixture.log;
        assert!(log.first(&online_frame()).unwrap() < log.first(&offline_frame()).unwrap());
        assert!(log.first(&Event::ConveyorStart).is_none());
        assert_eq!(log.teardown_events(), safe_state_sequence());
        // The listener is joined before teardown begins.
        assert!(log.last(&Event::LinkRead).unwrap() < log.first(&offline_frame()).unwrap());
    }

    #[test]
    fn shutdown_before_start_skips_the_loop_but_not_teardown() {
        let fixture = test_cell(false);
        let images = tempfile::tempdir().unwrap();
        let control = Arc::new(SharedControl::new());
        control.request_shutdown();

        operate(
            fixture.cell,
            fast_settings(images.path()),
            &quick_timings(),
            control,
        )
        .unwrap();

        let log = &fixture.log;
        assert!(log.first(&Event::ConveyorStart).is_none());
        assert_eq!(log.teardown_events(), safe_state_sequence());
        assert!(log.last(&Event::LinkRead).unwrap() < log.first(&offline_frame()).unwrap());
    }
}
