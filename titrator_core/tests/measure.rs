//! End-to-end runs of the measurement state machine against mock hardware.

use std::sync::{Arc, Mutex};

use titrator_core::mocks::{
    ManualClock, MockMotor, MockPower, PowerEvent, RecordingPublisher, ScriptedProbe,
};
use titrator_core::{
    AlkMeasurer, AlkReading, Doser, DoserConfig, DoserRole, DoserSet, MeasurementAction,
    PhCalibrator, PhReadConfig, PhReader, StepResult, TimeKeeper, TitrationConfig,
};

struct Rig {
    measurer: AlkMeasurer,
    dosers: DoserSet,
    ph_reader: PhReader,
    publisher: RecordingPublisher,
    time: TimeKeeper,
    clock: Arc<ManualClock>,
    fill_log: Arc<Mutex<Vec<i32>>>,
    reagent_log: Arc<Mutex<Vec<i32>>>,
    power_events: Arc<Mutex<Vec<PowerEvent>>>,
    alk_published: Arc<Mutex<Vec<AlkReading>>>,
}

fn rig(conf: TitrationConfig, probe_values: impl IntoIterator<Item = f32>) -> Rig {
    let doser_conf = DoserConfig {
        ml_per_rotation: 1.0,
        ..DoserConfig::default()
    };
    let fill = MockMotor::new();
    let drain = MockMotor::new();
    let reagent = MockMotor::new();
    let power = MockPower::new();
    let fill_log = fill.handle();
    let reagent_log = reagent.handle();
    let power_events = power.handle();

    let mut dosers = DoserSet::new(Box::new(power));
    dosers.insert(DoserRole::Fill, Doser::new(Box::new(fill), doser_conf));
    dosers.insert(DoserRole::Drain, Doser::new(Box::new(drain), doser_conf));
    dosers.insert(DoserRole::Reagent, Doser::new(Box::new(reagent), doser_conf));

    let ph_reader = PhReader::new(
        Box::new(ScriptedProbe::new(probe_values)),
        PhCalibrator::identity(),
        PhReadConfig::default(),
    );

    let publisher = RecordingPublisher::new();
    let alk_published = publisher.alk_handle();
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let time = TimeKeeper::new(clock.clone(), clock.clone());

    Rig {
        measurer: AlkMeasurer::new(conf),
        dosers,
        ph_reader,
        publisher,
        time,
        clock,
        fill_log,
        reagent_log,
        power_events,
        alk_published,
    }
}

impl Rig {
    fn step(&mut self, prev: StepResult) -> StepResult {
        self.clock.advance_ms(1_000);
        self.measurer
            .step(
                prev,
                &mut self.dosers,
                &mut self.ph_reader,
                &mut self.publisher,
                &self.time,
            )
            .expect("step should succeed")
    }

    fn run_to_done(&mut self, mut cursor: StepResult, max_steps: usize) -> (StepResult, usize) {
        for taken in 0..max_steps {
            if cursor.is_done() {
                return (cursor, taken);
            }
            cursor = self.step(cursor);
        }
        assert!(cursor.is_done(), "run did not finish in {max_steps} steps");
        (cursor, max_steps)
    }
}

fn small_conf() -> TitrationConfig {
    TitrationConfig {
        ph_sample_count: 2,
        ..TitrationConfig::default()
    }
}

#[test]
fn full_run_reaches_endpoint_and_reports_dkh() {
    // Two high samples force one incremental dose, then two at-target
    // samples end the run.
    let mut rig = rig(small_conf(), [5.1, 5.1, 4.5, 4.5]);
    let cursor = rig.measurer.begin_default(&rig.time, "tank-a");

    let (done, steps) = rig.run_to_done(cursor, 32);
    // PRIME + CLEAN_AND_FILL + 7 measure steps + CLEANUP
    assert_eq!(steps, 10);
    assert_eq!(done.next_action, MeasurementAction::MeasureDone);

    assert_eq!(done.reading.tank_water_volume_ml, 200.0);
    assert!((done.reading.reagent_volume_ml - 3.1).abs() < 1e-5);
    assert_eq!(done.reading.dkh, 4.34);
    assert_eq!(done.reading.title, "tank-a");

    let published = rig.alk_published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].dkh, 4.34);
}

#[test]
fn prime_volumes_stay_out_of_the_reading() {
    let mut rig = rig(small_conf(), [4.5, 4.5]);
    let cursor = rig.measurer.begin_default(&rig.time, "t");
    let (done, _) = rig.run_to_done(cursor, 32);

    // Fill pump moved the prime push plus three vessel fills (the PRIME
    // rinse, the measurement fill, the CLEANUP refill), but the reading
    // only counts the measurement fill.
    let fill_total: i32 = rig.fill_log.lock().unwrap().iter().sum();
    assert_eq!(fill_total, (10.0_f32 + 3.0 * 200.0) as i32 * 360);
    assert_eq!(done.reading.tank_water_volume_ml, 200.0);
    assert_eq!(done.scratch.tank_water_volume_ml, 10.0 + 2.0 * 200.0);
    assert_eq!(done.scratch.reagent_volume_ml, 0.5);
}

#[test]
fn reagent_cap_ends_run_with_result() {
    let conf = TitrationConfig {
        ph_sample_count: 1,
        initial_reagent_dose_volume_ml: 3.0,
        incremental_reagent_dose_volume_ml: 1.0,
        max_reagent_dose_ml: 5.0,
        ..TitrationConfig::default()
    };
    // pH never reaches the endpoint
    let mut rig = rig(conf, [6.0]);
    let cursor = rig.measurer.begin_default(&rig.time, "stuck");
    let (done, _) = rig.run_to_done(cursor, 64);

    assert_eq!(done.next_action, MeasurementAction::MeasureDone);
    assert!((done.reading.reagent_volume_ml - 5.0).abs() < 1e-5);
    // capped runs still publish
    assert_eq!(rig.alk_published.lock().unwrap().len(), 1);
}

#[test]
fn terminal_step_is_a_no_op() {
    let mut rig = rig(small_conf(), [4.5, 4.5]);
    let cursor = rig.measurer.begin_default(&rig.time, "t");
    let (done, _) = rig.run_to_done(cursor, 32);

    let motions_before = rig.reagent_log.lock().unwrap().len();
    let as_of_before = done.as_of_ms;
    let again = rig.step(done);
    assert!(again.is_done());
    assert_eq!(again.as_of_ms, as_of_before);
    assert_eq!(rig.reagent_log.lock().unwrap().len(), motions_before);
    assert_eq!(rig.alk_published.lock().unwrap().len(), 1);
}

#[test]
fn every_step_advances_timestamps() {
    let mut rig = rig(small_conf(), [4.5, 4.5]);
    let mut cursor = rig.measurer.begin_default(&rig.time, "t");
    let mut last_ms = cursor.as_of_ms;
    while !cursor.is_done() {
        cursor = rig.step(cursor);
        assert!(cursor.as_of_ms > last_ms);
        assert_eq!(cursor.reading.as_of_ms, cursor.as_of_ms);
        assert_eq!(cursor.scratch.as_of_ms, cursor.as_of_ms);
        assert_eq!(cursor.as_of_adjusted_sec, 1_700_000_000 + cursor.as_of_ms / 1_000);
        last_ms = cursor.as_of_ms;
    }
}

#[test]
fn power_enabled_for_run_and_cut_at_cleanup() {
    let mut rig = rig(small_conf(), [4.5, 4.5]);
    let cursor = rig.measurer.begin_default(&rig.time, "t");
    rig.run_to_done(cursor, 32);

    let events = rig.power_events.lock().unwrap();
    assert_eq!(events.first(), Some(&PowerEvent::Enabled));
    assert_eq!(events.last(), Some(&PowerEvent::Disabled));
}

#[test]
fn motor_failure_cuts_power_and_propagates() {
    let doser_conf = DoserConfig {
        ml_per_rotation: 1.0,
        ..DoserConfig::default()
    };
    let power = MockPower::new();
    let power_events = power.handle();
    let mut dosers = DoserSet::new(Box::new(power));
    dosers.insert(
        DoserRole::Fill,
        Doser::new(Box::new(MockMotor::failing("stepper jammed")), doser_conf),
    );
    dosers.insert(
        DoserRole::Drain,
        Doser::new(Box::new(MockMotor::new()), doser_conf),
    );
    dosers.insert(
        DoserRole::Reagent,
        Doser::new(Box::new(MockMotor::new()), doser_conf),
    );
    let mut ph_reader = PhReader::new(
        Box::new(ScriptedProbe::new([7.0])),
        PhCalibrator::identity(),
        PhReadConfig::default(),
    );
    let mut publisher = RecordingPublisher::new();
    let clock = Arc::new(ManualClock::new(0));
    let time = TimeKeeper::new(clock.clone(), clock.clone());
    let measurer = AlkMeasurer::new(TitrationConfig::default());

    let cursor = measurer.begin_default(&time, "t");
    let err = measurer
        .step(cursor, &mut dosers, &mut ph_reader, &mut publisher, &time)
        .unwrap_err();
    assert!(err.to_string().contains("rotating doser motor"));
    assert_eq!(
        power_events.lock().unwrap().last(),
        Some(&PowerEvent::Disabled)
    );
}
