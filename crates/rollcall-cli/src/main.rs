use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::future::Future;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance: look at the camera until you are recognised
    Attend,
    /// Enroll a new identity from the camera
    Enroll {
        /// Display name (no '_', ',', '/', '\' or '"')
        #[arg(short, long)]
        name: String,
        /// Roll number, unique per identity
        #[arg(short, long)]
        roll: u32,
    },
    /// Delete an identity and its face samples
    Delete {
        /// Roll number to delete
        roll: u32,
    },
    /// List enrolled identities
    List,
    /// Show today's attendance summary
    Stats,
    /// Show the attendance records for a date
    Attendance {
        /// Date as YYYY-MM-DD
        date: String,
    },
    /// Retrain the classifier from all stored samples
    Train,
    /// Show daemon status
    Status,
    /// List V4L2 capture devices on this machine
    Devices,
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn take_attendance(&self) -> zbus::Result<String>;
    async fn enroll(&self, name: &str, roll: u32) -> zbus::Result<String>;
    async fn delete_identity(&self, roll: u32) -> zbus::Result<String>;
    async fn retrain(&self) -> zbus::Result<String>;
    async fn cancel(&self) -> zbus::Result<bool>;
    async fn stats(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn attendance(&self, date: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        command => call_daemon(command).await?,
    }

    Ok(())
}

async fn call_daemon(command: Commands) -> Result<()> {
    let conn = zbus::Connection::session().await?;
    let proxy = AttendanceProxy::new(&conn).await?;

    match command {
        Commands::Attend => {
            println!("Look at the camera...");
            let reply = run_session(&proxy, proxy.take_attendance()).await?;
            println!("{}", describe_outcome(&reply));
        }
        Commands::Enroll { name, roll } => {
            println!("Enrolling {name} ({roll}); keep your face in view...");
            let reply = run_session(&proxy, proxy.enroll(&name, roll)).await?;
            print_json(&reply);
        }
        Commands::Delete { roll } => print_json(&proxy.delete_identity(roll).await?),
        Commands::List => print_json(&proxy.list_identities().await?),
        Commands::Stats => print_json(&proxy.stats().await?),
        Commands::Attendance { date } => print_json(&proxy.attendance(&date).await?),
        Commands::Train => print_json(&proxy.retrain().await?),
        Commands::Status => print_json(&proxy.status().await?),
        Commands::Devices => list_devices(),
    }

    Ok(())
}

/// Await a session call; Ctrl-C asks the daemon to cancel, then waits for
/// the session's final reply.
async fn run_session<F>(proxy: &AttendanceProxy<'_>, call: F) -> zbus::Result<String>
where
    F: Future<Output = zbus::Result<String>>,
{
    tokio::pin!(call);
    tokio::select! {
        reply = &mut call => return reply,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling...");
            let cancelled = proxy.cancel().await?;
            tracing::debug!(cancelled, "cancel sent");
        }
    }
    call.await
}

fn list_devices() {
    let devices = rollcall_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}

fn describe_outcome(reply: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(reply) else {
        return reply.to_string();
    };
    let who = value
        .get("identity")
        .and_then(|id| {
            let name = id.get("display_name")?.as_str()?;
            Some(format!("{name} ({})", id.get("roll_id")?))
        })
        .unwrap_or_default();
    match value.get("outcome").and_then(Value::as_str) {
        Some("Recorded") => format!("Attendance recorded: {who}"),
        Some("AlreadyMarked") => format!("Already marked present today: {who}"),
        Some("NoFaceConfirmed") => "No face confirmed; try again".to_string(),
        Some("Cancelled") => "Cancelled".to_string(),
        _ => reply.to_string(),
    }
}

fn print_json(reply: &str) {
    match serde_json::from_str::<Value>(reply) {
        Ok(value) => {
            let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| reply.to_string());
            println!("{pretty}");
        }
        Err(_) => println!("{reply}"),
    }
}
