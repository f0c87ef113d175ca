//! Clinitrack CLI - clinical outcome tracking.

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use clinitrack_core::{
    AssignmentId, AssignmentStatus, BaselineMode, ClinicId, ClinicianId, MeasureKey,
    MeasurementId, NewMeasurement, PatientId, ProtocolAssignment, ProtocolId, SessionId,
    SnapshotId, Time,
};
use clinitrack_progress::{
    standard_catalog, AssignmentTracker, MeasureLibrary, MeasurementLedger, ProgressAggregator,
    ReevaluationInput, ReevaluationRequest,
};
use clinitrack_storage::{JsonStorage, Storage};

#[derive(Parser)]
#[command(name = "clinitrack")]
#[command(about = "Clinical outcome tracking", long_about = None)]
struct Cli {
    /// Storage directory
    #[arg(long, global = true, default_value = ".clinitrack")]
    storage: PathBuf,

    /// Storage backend
    #[arg(long, global = true, value_enum, default_value_t = Backend::Json)]
    backend: Backend,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// One JSON file per record
    Json,
    /// SQLite database (requires the `sqlite` feature)
    Sqlite,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the built-in measure catalog
    Seed,
    /// List measure definitions
    Definitions,
    /// Record a measurement
    Record {
        /// Patient ID
        #[arg(long)]
        patient: PatientId,
        /// Clinic ID
        #[arg(long)]
        clinic: ClinicId,
        /// Clinician ID
        #[arg(long)]
        clinician: ClinicianId,
        /// Measure key
        key: String,
        /// Value
        value: f64,
        /// Session ID
        #[arg(long)]
        session: Option<SessionId>,
        /// Note
        #[arg(long)]
        note: Option<String>,
        /// When the value was measured (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<Time>,
    },
    /// Show a patient's history for one measure
    History {
        /// Patient ID
        patient: PatientId,
        /// Measure key
        key: String,
    },
    /// Compare baseline and latest values for one measure
    Progress {
        /// Patient ID
        patient: PatientId,
        /// Measure key
        key: String,
        /// Compare the latest value at or before this time
        #[arg(long)]
        as_of: Option<Time>,
        /// Use the latest earlier value at or before this time as baseline
        #[arg(long)]
        baseline_before: Option<Time>,
    },
    /// Re-evaluate a patient and store the snapshot
    Reevaluate {
        /// Patient ID
        #[arg(long)]
        patient: PatientId,
        /// Clinic ID
        #[arg(long)]
        clinic: ClinicId,
        /// Clinician ID
        #[arg(long)]
        clinician: ClinicianId,
        /// Values as `key=value` or `key=value:threshold`
        #[arg(long = "item", value_parser = parse_item, required = true)]
        items: Vec<ReevaluationInput>,
        /// Explicit baselines as `key=measurement-id`
        #[arg(long = "baseline", value_parser = parse_baseline)]
        baselines: Vec<(MeasureKey, MeasurementId)>,
        /// Use the latest value at or before this time as baseline
        #[arg(long)]
        cutoff: Option<Time>,
        /// Session ID
        #[arg(long)]
        session: Option<SessionId>,
        /// Clinical notes
        #[arg(long)]
        notes: Option<String>,
        /// Compute without storing
        #[arg(long)]
        dry_run: bool,
    },
    /// List a patient's snapshots
    Snapshots {
        /// Patient ID
        patient: PatientId,
    },
    /// Show one snapshot
    Snapshot {
        /// Snapshot ID
        id: SnapshotId,
    },
    /// Assign a protocol
    Assign {
        /// Patient ID
        #[arg(long)]
        patient: PatientId,
        /// Clinic ID
        #[arg(long)]
        clinic: ClinicId,
        /// Assigning clinician
        #[arg(long)]
        clinician: ClinicianId,
        /// Protocol name
        name: String,
        /// Number of phases
        #[arg(long, default_value = "1")]
        phases: u32,
        /// Planned number of sessions
        #[arg(long)]
        sessions: Option<u32>,
        /// Protocol ID (generated if omitted)
        #[arg(long)]
        protocol: Option<ProtocolId>,
    },
    /// Show an assignment
    Assignment {
        /// Assignment ID
        id: AssignmentId,
    },
    /// Log a completed session on an assignment
    LogSession {
        /// Assignment ID
        id: AssignmentId,
        /// Version last read
        #[arg(long)]
        version: u64,
    },
    /// Move an assignment to its next phase
    AdvancePhase {
        /// Assignment ID
        id: AssignmentId,
        /// Version last read
        #[arg(long)]
        version: u64,
    },
    /// Change an assignment's status
    SetStatus {
        /// Assignment ID
        id: AssignmentId,
        /// New status (active, paused, completed, discontinued)
        status: AssignmentStatus,
        /// Version last read
        #[arg(long)]
        version: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tokio::fs::create_dir_all(&cli.storage).await?;

    match cli.backend {
        Backend::Json => {
            let storage = JsonStorage::new(&cli.storage).await?;
            run(Arc::new(storage), cli.command).await
        }
        #[cfg(feature = "sqlite")]
        Backend::Sqlite => {
            let storage = clinitrack_storage::SqliteStorage::new_from_path(&cli.storage.join("clinitrack.db")).await?;
            run(Arc::new(storage), cli.command).await
        }
        #[cfg(not(feature = "sqlite"))]
        Backend::Sqlite => anyhow::bail!("this build has no SQLite support; rebuild with --features sqlite"),
    }
}

async fn run<S: Storage + 'static>(storage: Arc<S>, command: Commands) -> Result<()> {
    match command {
        Commands::Seed => {
            let count = MeasureLibrary::new(storage).seed(&standard_catalog()).await?;
            println!("Seeded {} measure definitions", count);
        }
        Commands::Definitions => {
            let definitions = MeasureLibrary::new(storage).list().await?;
            println!("Definitions ({})", definitions.len());
            for d in definitions {
                let threshold = match (d.mcid, d.mdc) {
                    (Some(mcid), _) => format!("mcid {}", mcid),
                    (None, Some(mdc)) => format!("mdc {}", mdc),
                    (None, None) => "-".to_string(),
                };
                println!(
                    "  {} | {} | [{}, {}] {} | {} | {}",
                    d.key,
                    d.family.as_str(),
                    d.min_value,
                    d.max_value,
                    d.unit,
                    if d.higher_is_better { "higher better" } else { "lower better" },
                    threshold,
                );
            }
        }
        Commands::Record { patient, clinic, clinician, key, value, session, note, at } => {
            let mut measurement = NewMeasurement::new(patient, clinic, clinician, key, value);
            measurement.session_id = session;
            measurement.note = note;
            measurement.recorded_at = at;

            let record = MeasurementLedger::new(storage).record(measurement).await?;
            println!("Recorded {}: {} = {}", record.id, record.measure_key, record.value);
        }
        Commands::History { patient, key } => {
            let key = MeasureKey::new(key);
            let history = MeasurementLedger::new(storage).history(patient, &key).await?;
            println!("History of {} ({})", key, history.len());
            for r in history {
                println!("  {} | {} | {}", r.recorded_at.to_rfc3339(), r.value, r.id);
            }
        }
        Commands::Progress { patient, key, as_of, baseline_before } => {
            let mode = match baseline_before {
                Some(cutoff) => BaselineMode::LatestBefore { cutoff },
                None => BaselineMode::FirstRecorded,
            };
            let result = MeasurementLedger::new(storage)
                .progress(patient, &MeasureKey::new(key), mode, as_of)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Reevaluate {
            patient,
            clinic,
            clinician,
            items,
            baselines,
            cutoff,
            session,
            notes,
            dry_run,
        } => {
            let mut request = ReevaluationRequest::new(patient, clinic, clinician);
            request.items = items;
            request.explicit_baselines = baselines.into_iter().collect();
            request.session_id = session;
            request.notes = notes;
            if let Some(cutoff) = cutoff {
                request.baseline_mode = BaselineMode::LatestBefore { cutoff };
            }

            let aggregator = ProgressAggregator::new(storage);
            let snapshot = if dry_run {
                aggregator.preview(&request).await?
            } else {
                aggregator.reevaluate(&request).await?
            };
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Snapshots { patient } => {
            let headers = ProgressAggregator::new(storage).snapshots(patient).await?;
            println!("Snapshots ({})", headers.len());
            for h in headers {
                let s = &h.summary;
                println!(
                    "  {} | {} | {} items: {} improved, {} declined, {} stable, {} significant",
                    h.id,
                    h.taken_at.to_rfc3339(),
                    s.total,
                    s.improved,
                    s.declined,
                    s.stable,
                    s.significant,
                );
            }
        }
        Commands::Snapshot { id } => {
            let snapshot = ProgressAggregator::new(storage).snapshot(id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Assign { patient, clinic, clinician, name, phases, sessions, protocol } => {
            let mut assignment = ProtocolAssignment::new(
                patient,
                clinic,
                protocol.unwrap_or_default(),
                name,
                clinician,
                phases,
            );
            assignment.target_sessions = sessions;

            let assignment = AssignmentTracker::new(storage).assign(assignment).await?;
            info!("Assigned {} to patient {}", assignment.protocol_name, assignment.patient_id);
            println!("Assigned: {} (version {})", assignment.id, assignment.version);
        }
        Commands::Assignment { id } => {
            let a = AssignmentTracker::new(storage).get(id).await?;
            print_assignment(&a);
        }
        Commands::LogSession { id, version } => {
            let a = AssignmentTracker::new(storage).record_session(id, version).await?;
            print_assignment(&a);
        }
        Commands::AdvancePhase { id, version } => {
            let a = AssignmentTracker::new(storage).advance_phase(id, version).await?;
            print_assignment(&a);
        }
        Commands::SetStatus { id, status, version } => {
            let a = AssignmentTracker::new(storage).set_status(id, version, status).await?;
            print_assignment(&a);
        }
    }

    Ok(())
}

fn print_assignment(a: &ProtocolAssignment) {
    println!("Assignment: {}", a.id);
    println!("  Protocol: {}", a.protocol_name);
    println!("  Patient: {}", a.patient_id);
    println!("  Status: {}", a.status.as_str());
    println!("  Phase: {}/{}", a.current_phase, a.total_phases);
    match a.adherence_percent() {
        Some(percent) => println!(
            "  Sessions: {}/{} ({:.0}%)",
            a.sessions_completed,
            a.target_sessions.unwrap_or_default(),
            percent
        ),
        None => println!("  Sessions: {}", a.sessions_completed),
    }
    if let Some(notes) = &a.progress_notes {
        println!("  Notes: {}", notes);
    }
    println!("  Version: {}", a.version);
}

fn parse_item(s: &str) -> Result<ReevaluationInput> {
    let (key, rest) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got {}", s))?;
    let input = match rest.split_once(':') {
        Some((value, threshold)) => ReevaluationInput::new(key, value.trim().parse()?)
            .with_threshold(threshold.trim().parse()?),
        None => ReevaluationInput::new(key, rest.trim().parse()?),
    };
    Ok(input)
}

fn parse_baseline(s: &str) -> Result<(MeasureKey, MeasurementId)> {
    let (key, id) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=measurement-id, got {}", s))?;
    Ok((MeasureKey::new(key), id.trim().parse()?))
}
