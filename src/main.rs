use anyhow::Result;
use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;
use log::{info, error, debug, trace};

use active_matter_common::{SimulationConfig, Snapshot};
use active_matter_engine::output::{write_delta_n_table, write_snapshots, SnapshotFormat};
use active_matter_engine::{DeltaNRow, DeltaNStudy};

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Active Matter Engine...");

    // --- Load Configuration ---
    let config = SimulationConfig::load("config.toml")?;
    debug!("Configuration: {:#?}", config);

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Simulations ---
    let plans = config.run_plans()?;
    info!("Initializing {} simulation(s)...", plans.len());
    let mut study = DeltaNStudy::from_plan(&plans, config.analysis.cluster_inspector)?;

    let total_steps = config.timing.total_steps;
    let record_interval_steps = config.timing.record_interval_steps;
    info!("Recording statistics every {} steps.", record_interval_steps);

    info!("Starting simulation loop for {} steps...", total_steps);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    let mut snapshots: Vec<Snapshot> = study.snapshots(0);

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        study.advance();
        let step_duration = step_start_time.elapsed();

        let current_time = Instant::now();
        let print_interval_secs = 5.0;
        let should_print_status = current_time.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs;
        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step + 1 == total_steps;

        if is_record_step || is_last_step {
            study.settle();
            snapshots.extend(study.snapshots(step + 1));
        }

        if should_print_status || is_record_step || is_last_step {
            info!(
                "Step [{}/{}] | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = current_time;
        } else {
            trace!(
                "Step [{}/{}] submitted in {:.2} ms",
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }
    study.settle();

    let total_duration = start_time.elapsed();
    info!(
        "Simulation finished in {:.3} seconds ({:.3} minutes).",
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() / 60.0
    );

    let table = study.delta_n_table();
    for row in &table {
        info!(
            "pf={:.4} Nl={:>6.1} | N={:8.3} dN={:7.3} | log10 N={:6.3} log10 dN={:6.3}",
            row.packing_fraction,
            row.target_occupancy,
            row.mean,
            row.stdev,
            row.log10_mean(),
            row.log10_stdev()
        );
    }

    // --- Save Recorded Data ---
    if config.output.save_stats {
        let base = &config.output.base_filename;
        save_snapshots(&snapshots, base, config.output.format.as_deref().unwrap_or("json"));
        save_delta_n_table(&table, base)?;
    } else {
        info!("Skipping saving statistics as per config (save_stats is false).");
    }

    info!("Simulation Complete.");
    Ok(())
}

fn save_snapshots(snapshots: &[Snapshot], base: &str, output_format: &str) {
    let format = SnapshotFormat::from_name(output_format);
    let filename = format!("{}_snapshots.{}", base, format.extension());
    match File::create(&filename) {
        Ok(file) => match write_snapshots(BufWriter::new(file), snapshots, format) {
            Ok(_) => info!("All snapshots saved to {} ({:?} format)", filename, format),
            Err(e) => error!("Error writing snapshots to '{}': {}", filename, e),
        },
        Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
    }
}

fn save_delta_n_table(table: &[DeltaNRow], base: &str) -> Result<()> {
    let filename = format!("{}_delta_n.csv", base);
    match File::create(&filename) {
        Ok(file) => {
            write_delta_n_table(file, table)?;
            info!("Delta N table saved to {}", filename);
        }
        Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
    }
    Ok(())
}
