//! Command implementations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eyre::WrapErr;
use titrator_config::{Config, TitrationCfg};
use titrator_core::{
    AlkMeasurer, AlkReading, Controller, DoserRole, PhReading, Publisher, ReadingStore, Result,
    TimeKeeper, TitrationConfig, TriggerRequest,
};

use crate::hw::Instrument;

/// Publishes pH to the log stream and keeps the last completed reading for
/// the process to print on exit.
pub struct CliPublisher {
    last_alk: Arc<Mutex<Option<AlkReading>>>,
}

impl CliPublisher {
    pub fn new() -> Self {
        Self {
            last_alk: Arc::new(Mutex::new(None)),
        }
    }

    pub fn last_alk_handle(&self) -> Arc<Mutex<Option<AlkReading>>> {
        Arc::clone(&self.last_alk)
    }
}

impl Publisher for CliPublisher {
    fn publish_ph(&mut self, reading: &PhReading) -> Result<()> {
        tracing::info!(
            raw = reading.raw_ph,
            calibrated = reading.calibrated_ph,
            calibrated_mavg = reading.calibrated_ph_mavg,
            "pH"
        );
        Ok(())
    }

    fn publish_alk_reading(&mut self, reading: &AlkReading) -> Result<()> {
        tracing::info!(
            dkh = reading.dkh,
            reagent_ml = reading.reagent_volume_ml,
            water_ml = reading.tank_water_volume_ml,
            title = %reading.title,
            "alkalinity reading"
        );
        if let Ok(mut slot) = self.last_alk.lock() {
            *slot = Some(reading.clone());
        }
        Ok(())
    }
}

/// Merge config-file overrides onto the engine defaults.
///
/// `prime_reagent_reverse_volume_ml <= 0` disables the reverse pull entirely.
pub fn titration_conf(cfg: &TitrationCfg) -> TitrationConfig {
    let mut c = TitrationConfig::default();
    if let Some(v) = cfg.prime_tank_water_fill_volume_ml {
        c.prime_tank_water_fill_volume_ml = v;
    }
    if let Some(v) = cfg.prime_reagent_volume_ml {
        c.prime_reagent_volume_ml = v;
    }
    if let Some(v) = cfg.prime_reagent_reverse_volume_ml {
        c.prime_reagent_reverse_volume_ml = if v > 0.0 { Some(v) } else { None };
    }
    if let Some(v) = cfg.measurement_tank_water_volume_ml {
        c.measurement_tank_water_volume_ml = v;
    }
    if let Some(v) = cfg.extra_purge_volume_ml {
        c.extra_purge_volume_ml = v;
    }
    if let Some(v) = cfg.initial_reagent_dose_volume_ml {
        c.initial_reagent_dose_volume_ml = v;
    }
    if let Some(v) = cfg.incremental_reagent_dose_volume_ml {
        c.incremental_reagent_dose_volume_ml = v;
    }
    if let Some(v) = cfg.max_reagent_dose_ml {
        c.max_reagent_dose_ml = v;
    }
    if let Some(v) = cfg.stir_amount_ml {
        c.stir_amount_ml = v;
    }
    if let Some(v) = cfg.stir_times {
        c.stir_times = v;
    }
    if let Some(v) = cfg.ph_sample_count {
        c.ph_sample_count = v;
    }
    if let Some(v) = cfg.reagent_strength_moles {
        c.reagent_strength_moles = v;
    }
    if let Some(v) = cfg.calibration_multiplier {
        c.calibration_multiplier = v;
    }
    c
}

pub fn load_store(cfg: &Config) -> eyre::Result<ReadingStore> {
    match std::fs::read(&cfg.store.path) {
        Ok(bytes) => ReadingStore::decode(&bytes, cfg.store.capacity)
            .wrap_err_with(|| format!("decoding reading store {}", cfg.store.path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(ReadingStore::new(cfg.store.capacity))
        }
        Err(e) => Err(e).wrap_err_with(|| format!("reading store {}", cfg.store.path)),
    }
}

pub fn save_store(cfg: &Config, store: &ReadingStore) -> eyre::Result<()> {
    let bytes = store.encode()?;
    std::fs::write(&cfg.store.path, bytes)
        .wrap_err_with(|| format!("writing store {}", cfg.store.path))
}

pub fn run_measure(
    cfg: &Config,
    instrument: Instrument,
    title: &str,
    step_interval_ms: Option<u64>,
    max_steps: Option<u64>,
    shutdown: &Arc<AtomicBool>,
    json: bool,
) -> eyre::Result<()> {
    let conf = titration_conf(&cfg.titration);
    conf.validate()?;
    let publisher = CliPublisher::new();
    let last_alk = publisher.last_alk_handle();
    let time = TimeKeeper::system();
    let store = load_store(cfg)?;
    let step_interval = step_interval_ms.unwrap_or(cfg.measurement.step_interval_ms);
    let mut controller = Controller::new(
        AlkMeasurer::new(conf),
        instrument.dosers,
        instrument.ph_reader,
        Box::new(publisher),
        time.clone(),
        store,
    )
    .with_step_interval_ms(step_interval)
    .with_stall_timeout_ms(cfg.measurement.stall_timeout_ms);

    if let Some(limit) = max_steps {
        // Manual stepping: a bounded number of discrete steps.
        controller.begin_manual(title);
        for _ in 0..limit {
            let Some(cursor) = controller.manual_step()? else {
                break;
            };
            tracing::info!(action = %cursor.next_action, step_action = %cursor.next_step_action, "stepped");
            if cursor.is_done() {
                break;
            }
            if shutdown.load(Ordering::SeqCst) {
                tracing::warn!("interrupted; cutting doser power");
                controller.disable_dosers()?;
                save_store(cfg, controller.store())?;
                eyre::bail!("interrupted");
            }
            time.sleep(Duration::from_millis(step_interval));
        }
    } else {
        let started = controller.handle_trigger(&TriggerRequest {
            title: title.to_string(),
            as_of: time.adjusted_secs(),
            overrides: Default::default(),
        });
        if !started {
            eyre::bail!("measurement did not start");
        }
        while controller.active_run().is_some() {
            if shutdown.load(Ordering::SeqCst) {
                tracing::warn!("interrupted; cutting doser power");
                controller.disable_dosers()?;
                save_store(cfg, controller.store())?;
                eyre::bail!("interrupted");
            }
            controller.tick()?;
            time.sleep(Duration::from_millis(50));
        }
    }

    save_store(cfg, controller.store())?;

    let completed = last_alk.lock().ok().and_then(|slot| slot.clone());
    match completed {
        Some(reading) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "complete",
                        "title": reading.title,
                        "dkh": reading.dkh,
                        "reagent_volume_ml": reading.reagent_volume_ml,
                        "tank_water_volume_ml": reading.tank_water_volume_ml,
                        "as_of_adjusted_sec": reading.as_of_adjusted_sec,
                    })
                );
            } else {
                println!(
                    "measurement complete: {:.2} dKH ({:.2} ml reagent into {:.0} ml sample)",
                    reading.dkh, reading.reagent_volume_ml, reading.tank_water_volume_ml
                );
            }
        }
        None => {
            if json {
                println!("{}", serde_json::json!({ "status": "incomplete" }));
            } else {
                println!("measurement incomplete");
            }
        }
    }
    Ok(())
}

pub fn run_dose(mut instrument: Instrument, role: &str, ml: f32) -> eyre::Result<()> {
    let role: DoserRole = role.parse()?;
    instrument.dosers.enable_all()?;
    let outcome = instrument.dosers.select(role).and_then(|d| d.dispense_ml(ml));
    instrument.dosers.disable_all()?;
    outcome?;
    println!("dispensed {ml} ml through {role}");
    Ok(())
}

pub fn run_rotate(mut instrument: Instrument, role: &str, degrees: i32) -> eyre::Result<()> {
    let role: DoserRole = role.parse()?;
    instrument.dosers.enable_all()?;
    let outcome = instrument
        .dosers
        .select(role)
        .and_then(|d| d.rotate_degrees(degrees));
    instrument.dosers.disable_all()?;
    outcome?;
    println!("rotated {role} by {degrees} degrees");
    Ok(())
}

pub fn run_ph(cfg: &Config, mut instrument: Instrument, samples: u32, json: bool) -> eyre::Result<()> {
    let time = TimeKeeper::system();
    let mut stats =
        titrator_core::PhStats::new(cfg.ph.raw_window, cfg.ph.calibrated_window);
    for _ in 0..samples {
        let sample = instrument.ph_reader.read_now(time.now_ms())?;
        let smoothed = stats.add(sample.as_of_ms, sample.raw_ph, sample.calibrated_ph);
        if json {
            println!(
                "{}",
                serde_json::json!({
                    "as_of_ms": smoothed.as_of_ms,
                    "raw_ph": smoothed.raw_ph,
                    "calibrated_ph": smoothed.calibrated_ph,
                    "calibrated_ph_mavg": smoothed.calibrated_ph_mavg,
                })
            );
        } else {
            println!(
                "pH {:.3} (raw {:.3}, avg {:.3})",
                smoothed.calibrated_ph, smoothed.raw_ph, smoothed.calibrated_ph_mavg
            );
        }
        time.sleep(Duration::from_millis(cfg.ph.read_interval_ms));
    }
    Ok(())
}

pub fn run_readings(cfg: &Config, json: bool) -> eyre::Result<()> {
    let store = load_store(cfg)?;
    let readings = store.sorted_by_as_of();
    if json {
        let rows: Vec<serde_json::Value> = readings
            .iter()
            .map(|r| {
                serde_json::json!({
                    "as_of_adjusted_sec": r.as_of_adjusted_sec,
                    "dkh": r.dkh(),
                    "title": r.title,
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "readings": rows }));
    } else if readings.is_empty() {
        println!("no readings stored");
    } else {
        for r in readings {
            println!("{:>10}  {:>5.1} dKH  {}", r.as_of_adjusted_sec, r.dkh(), r.title);
        }
    }
    Ok(())
}

pub fn run_self_check(cfg: &Config, mut instrument: Instrument, json: bool) -> eyre::Result<()> {
    instrument.dosers.enable_all().wrap_err("enabling doser power")?;
    instrument.dosers.disable_all().wrap_err("disabling doser power")?;
    let time = TimeKeeper::system();
    let sample = instrument
        .ph_reader
        .read_now(time.now_ms())
        .wrap_err("reading pH probe")?;
    for role in DoserRole::ALL {
        if !instrument.dosers.contains(role) {
            eyre::bail!("no doser configured for role '{role}'");
        }
    }
    let _ = load_store(cfg).wrap_err("opening reading store")?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "status": "ok",
                "ph": sample.calibrated_ph,
            })
        );
    } else {
        println!("self-check ok (pH {:.3})", sample.calibrated_ph);
    }
    Ok(())
}
