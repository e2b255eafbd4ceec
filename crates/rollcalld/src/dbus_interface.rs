use crate::session::SessionHandle;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    session: SessionHandle,
}

impl AttendanceService {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Acquire the camera and start watching. Returns the new session ID.
    async fn start_session(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start_session requested");
        self.session
            .start()
            .await
            .map(|id| id.to_string())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Stop watching and release the camera.
    async fn stop_session(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_session requested");
        self.session
            .stop()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Current state machine status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self
            .session
            .status()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        let mut json = serde_json::to_value(&status)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        json["version"] = env!("CARGO_PKG_VERSION").into();
        Ok(json.to_string())
    }

    /// Recent accepted recognitions as a JSON array, most recent first.
    async fn recent_results(&self) -> zbus::fdo::Result<String> {
        let results = self
            .session
            .results()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&results).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}
