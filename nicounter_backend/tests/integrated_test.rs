use ndarray::array;
use nicounter_backend::*;

fn counter() -> PhotonCounter<SimulatedDriver> {
    PhotonCounter::new(SimulatedDriver::new(), ChannelMap::new("Dev1").unwrap())
}

fn position(journal: &[DriverCall], call: &DriverCall) -> usize {
    journal
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call:?} not in journal"))
}

#[test]
fn four_channels_three_intervals() {
    let mut ctr = counter();
    ctr.driver_mut().script_counts("Dev1/ctr0", vec![0, 5, 10, 20]);
    ctr.driver_mut().script_counts("Dev1/ctr1", vec![100, 101, 101, 103]);
    ctr.driver_mut().script_counts("Dev1/ctr2", vec![7, 7, 7, 7]);
    ctr.driver_mut().script_counts("Dev1/ctr3", vec![1, 2, 4, 8]);

    let counts = ctr.read_counters(2., 3, &[1, 4, 8, 11]).unwrap();
    assert_eq!(counts.dim(), (4, 3));
    assert_eq!(
        counts,
        array![[5, 5, 10], [1, 0, 2], [0, 0, 0], [1, 2, 4]]
    );

    // Nominal acquisition time of 4 raw samples at 2 Hz plus the default margin
    assert!(ctr
        .driver()
        .journal()
        .iter()
        .filter(|c| matches!(c, DriverCall::Read { .. }))
        .all(|c| matches!(c, DriverCall::Read { timeout, .. } if *timeout == 3.)));
    assert!(ctr.driver().alive_tasks().is_empty());
}

#[test]
fn raw_apd_single_interval() {
    let mut ctr = counter();
    ctr.driver_mut().script_counts("Dev1/ctr0", vec![1000, 1007]);
    assert_eq!(ctr.read_counters(100., 1, &[11]).unwrap(), array![[7]]);
}

#[test]
fn single_read_matches_one_interval_read() {
    let mut a = counter();
    let mut b = counter();
    for ctr in [&mut a, &mut b] {
        ctr.driver_mut().script_counts("Dev1/ctr0", vec![40, 52]);
        ctr.driver_mut().script_counts("Dev1/ctr1", vec![3, 4]);
    }
    let single = a.read_counters_single(10., &[8, 4]).unwrap();
    let general = b.read_counters(10., 1, &[8, 4]).unwrap();
    assert_eq!(single, general);
    assert_eq!(single, array![[12], [1]]);
    assert_eq!(a.driver().journal(), b.driver().journal());
}

#[test]
fn unknown_channel_touches_no_hardware() {
    let mut ctr = counter();
    let err = ctr.read_counters(2., 3, &[11, 99]).unwrap_err();
    assert_eq!(
        err,
        DaqError::UnknownChannel {
            id: 99,
            known: vec![1, 4, 8, 11]
        }
    );
    assert!(ctr.driver().journal().is_empty());
}

#[test]
fn timeout_releases_every_task() {
    let mut ctr = counter();
    ctr.driver_mut().inject_fault(SimStep::Read, "Dev1/ctr1");
    let err = ctr.read_counters(1000., 10, &[11, 1, 4]).unwrap_err();
    assert!(err.is_timeout());
    assert!(ctr.driver().started_tasks().is_empty());
    assert!(ctr.driver().alive_tasks().is_empty());

    // The failure does not poison the next acquisition
    ctr.driver_mut().clear_journal();
    ctr.driver_mut().script_counts("Dev1/ctr0", vec![0, 9]);
    assert_eq!(ctr.read_counters(1000., 1, &[11]).unwrap(), array![[9]]);
}

#[test]
fn counters_start_before_clock() {
    let mut ctr = counter();
    ctr.read_counters(20., 2, &[11, 1, 4, 8]).unwrap();
    let journal = ctr.driver().journal();

    let clk_start = position(journal, &DriverCall::Start("clk".into()));
    for k in 0..4 {
        let name = format!("Dev1/ctr{k}");
        assert!(position(journal, &DriverCall::Commit(name.clone())) < clk_start);
        assert!(position(journal, &DriverCall::Start(name)) < clk_start);
    }
    // Clock task committed before any counter task is created
    assert!(
        position(journal, &DriverCall::Commit("clk".into()))
            < position(journal, &DriverCall::CreateTask("Dev1/ctr0".into()))
    );
    // Every created task is cleared exactly once
    for name in ["clk", "Dev1/ctr0", "Dev1/ctr1", "Dev1/ctr2", "Dev1/ctr3"] {
        let clears = journal
            .iter()
            .filter(|c| **c == DriverCall::Clear(name.into()))
            .count();
        assert_eq!(clears, 1, "{name}");
    }
}

#[test]
fn generated_counts_follow_rate() {
    let driver = SimulatedDriver::new().with_count_rate(1000., 3);
    let mut ctr = PhotonCounter::new(driver, ChannelMap::new("Dev1").unwrap());
    let counts = ctr.read_counters(10., 50, &[11]).unwrap();
    // Mean of 100 edges per interval, never more than twice that
    assert!(counts.iter().all(|&c| c <= 200));
    let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / 50.;
    assert!((50. ..150.).contains(&mean), "{mean}");
}

#[test]
fn debug_run_records_time_vs_time() {
    let sink = MemorySink::new();
    let mut exp = TaskVsTime::new(counter(), sink.clone(), ControlChannel::detached());
    let params = TaskVsTimeParams {
        sampling_freq: 100.,
        max_iters: Some(8),
        debug: true,
        ..Default::default()
    };
    let before = unix_time_secs();
    let summary = exp.run(&params).unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.iterations, 8);

    let data = exp.data();
    assert_eq!(data.times.len(), 8);
    assert_eq!(data.counts.len(), 8);
    assert!(data.times.windows(2).all(|w| w[1] >= w[0]));
    assert!(data.counts.windows(2).all(|w| w[1] >= w[0]));
    assert!(data.counts[0] >= before);
    // One sampling period slept per iteration
    assert!(data.times[7] >= 0.08);
    // Debug mode never touches the driver
    assert!(exp.counter().driver().journal().is_empty());

    let snap = sink.snapshot();
    assert_eq!(snap.pushes, 8);
    assert_eq!(snap.title, "Task vs Time");
    assert_eq!(snap.xlabel, "Time (s)");
    assert_eq!(snap.ylabel, "Counts");
    assert_eq!(snap.params, Some(params));
}

#[test]
fn stop_from_another_thread() {
    let (handle, control) = control_channel();
    let mut exp = TaskVsTime::new(counter(), LogSink, control);
    let params = TaskVsTimeParams {
        sampling_freq: 200.,
        max_iters: Some(100_000),
        debug: true,
        should_autosave: true,
        autosave_interval: 2,
        ..Default::default()
    };

    let stopper = std::thread::spawn(move || {
        // Wait for the first autosave request, then stop
        let note = handle.recv_note_timeout(std::time::Duration::from_secs(10));
        handle.stop();
        note
    });
    let summary = exp.run(&params).unwrap();
    let note = stopper.join().unwrap();

    assert_eq!(note.as_deref(), Some("SAVE_REQ:AUTO of TvT as TvT"));
    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert!(summary.iterations >= 2 && summary.iterations < 100_000);
    assert_eq!(exp.data().len() as u64, summary.iterations);
}

#[test]
fn hardware_run_reads_configured_channel() {
    let mut ctr = counter();
    ctr.driver_mut().script_counts("Dev1/ctr0", vec![10, 13]);
    ctr.driver_mut().script_counts("Dev1/ctr0", vec![13, 20]);
    let mut exp = TaskVsTime::new(ctr, MemorySink::new(), ControlChannel::detached());
    let params = TaskVsTimeParams {
        sampling_freq: 100.,
        max_iters: Some(2),
        ctr_chan: 4,
        ..Default::default()
    };
    exp.run(&params).unwrap();
    assert_eq!(exp.data().counts, vec![3., 7.]);
    assert!(exp
        .counter()
        .driver()
        .journal()
        .contains(&DriverCall::CreateCountEdgesChan {
            task: "Dev1/ctr0".into(),
            counter: "Dev1/ctr0".into(),
            terminal: "/Dev1/PFI4".into(),
        }));
}
