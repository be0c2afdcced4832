use crate::engine::{EngineError, EngineHandle};
use serde::Serialize;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the rollcall attendance daemon.
///
/// Results are returned as JSON strings. Failures are `org.freedesktop.DBus.Error.Failed`
/// with a `<Kind>: <message>` body.
pub struct AttendanceInterface {
    engine: EngineHandle,
}

impl AttendanceInterface {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceInterface {
    /// Run a recognition session and mark the confirmed identity present.
    async fn take_attendance(&self) -> zbus::fdo::Result<String> {
        tracing::info!("take_attendance requested");
        to_json(self.engine.take_attendance().await)
    }

    /// Enroll a new identity, collecting face samples from the camera.
    async fn enroll(&self, name: &str, roll: u32) -> zbus::fdo::Result<String> {
        tracing::info!(name, roll, "enroll requested");
        to_json(self.engine.enroll(name.to_string(), roll).await)
    }

    async fn delete_identity(&self, roll: u32) -> zbus::fdo::Result<String> {
        tracing::info!(roll, "delete_identity requested");
        to_json(self.engine.delete_identity(roll).await)
    }

    async fn retrain(&self) -> zbus::fdo::Result<String> {
        tracing::info!("retrain requested");
        to_json(self.engine.retrain().await)
    }

    /// Cancel the running session, if any.
    async fn cancel(&self) -> bool {
        self.engine.cancel()
    }

    async fn stats(&self) -> zbus::fdo::Result<String> {
        to_json(self.engine.stats().await)
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        to_json(self.engine.list_identities().await)
    }

    /// Attendance records for a `YYYY-MM-DD` date.
    async fn attendance(&self, date: &str) -> zbus::fdo::Result<String> {
        to_json(self.engine.attendance(date).await)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(self.engine.status().await)
    }
}

fn to_json<T: Serialize>(result: Result<T, EngineError>) -> zbus::fdo::Result<String> {
    let value = result.map_err(to_fdo)?;
    serde_json::to_string(&value).map_err(|e| zbus::fdo::Error::Failed(format!("Internal: {e}")))
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    tracing::warn!(kind = e.kind(), error = %e, "request failed");
    zbus::fdo::Error::Failed(format!("{}: {e}", e.kind()))
}
