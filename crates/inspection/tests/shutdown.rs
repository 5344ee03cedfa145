mod support;

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use inspection::{CommandListener, CycleOutcome, wait_for_start};
use support::{CellBuilder, Event, cm};

#[test]
fn shutdown_byte_while_scanning_ends_the_run() {
    let (cell, mut controller) = CellBuilder {
        samples: vec![cm(40.0)],
        poll: Duration::from_millis(10),
        ..CellBuilder::default()
    }
    .build();
    let listener = CommandListener::new(
        cell.display.clone(),
        Arc::clone(&cell.control),
        Duration::from_millis(5),
    )
    .spawn()
    .unwrap();

    cell.display_link.push_input(b'g');
    assert!(wait_for_start(&cell.control, Duration::from_millis(5)));

    let run = thread::spawn(move || {
        let summary = controller.run();
        (summary, controller)
    });
    thread::sleep(Duration::from_millis(60));
    cell.display_link.push_input(b'B');

    let (summary, controller) = run.join().unwrap();
    let summary = summary.unwrap();
    let stats = listener.stop();

    assert_eq!(summary.cycles, 0);
    assert_eq!(stats.commands, 2);
    assert!(!cell.control.is_running());
    assert_eq!(cell.log.count(|e| *e == Event::Acquire), 0);
    assert_eq!(cell.log.events().last(), Some(&Event::ConveyorStop));
    drop(controller.into_parts());
}

#[test]
fn scan_observes_shutdown_within_one_poll() {
    let poll = Duration::from_millis(50);
    let (cell, mut controller) = CellBuilder {
        samples: vec![cm(40.0)],
        poll,
        ..CellBuilder::default()
    }
    .build();

    let run = thread::spawn(move || controller.run_cycle());
    thread::sleep(Duration::from_millis(120));
    let requested = Instant::now();
    cell.control.request_shutdown();

    let outcome = run.join().unwrap().unwrap();
    let latency = requested.elapsed();

    assert_eq!(outcome, CycleOutcome::Shutdown);
    // One poll interval plus scheduling slack.
    assert!(latency < poll * 3, "took {latency:?}");
    assert!(cell.log.count(|e| matches!(e, Event::Measure(_))) >= 2);
}

#[test]
fn signal_flag_is_honoured_like_a_command() {
    let (cell, mut controller) = CellBuilder {
        samples: vec![cm(40.0)],
        ..CellBuilder::default()
    }
    .build();

    let run = thread::spawn(move || controller.run());
    thread::sleep(Duration::from_millis(20));
    cell.control.signal_shutdown();

    let summary = run.join().unwrap().unwrap();
    assert_eq!(summary.cycles, 0);
    assert_eq!(cell.log.events().last(), Some(&Event::ConveyorStop));
}

#[test]
fn shutdown_before_the_first_cycle_never_moves_the_belt() {
    let (cell, mut controller) = CellBuilder::default().build();
    cell.control.request_shutdown();

    let summary = controller.run().unwrap();

    assert_eq!(summary.cycles, 0);
    assert_eq!(cell.log.count(|e| *e == Event::ConveyorStart), 0);
    assert_eq!(cell.display_link.values("state"), vec![0]);
}

#[test]
fn mid_cycle_shutdown_finishes_the_item_first() {
    let (cell, mut controller) = CellBuilder {
        class_id: Some(1),
        shutdown_on_classify: true,
        ..CellBuilder::default()
    }
    .build();

    let summary = controller.run().unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(cell.log.count(|e| *e == Event::Rest), 1);
    assert_eq!(cell.display_link.values("state"), vec![0, 1, 2, 4, 5, 0]);
    assert_eq!(cell.log.events().last(), Some(&Event::ConveyorStop));
}
