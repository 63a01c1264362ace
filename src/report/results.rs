//! Serializable record of a finished run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scoring::Rating;
use crate::server::ServerInfo;
use crate::session::{Phase, Session};

/// Everything a run produced, in the shape written by `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Timestamp when the run finished
    pub timestamp: DateTime<Utc>,
    /// Real-time channel session id
    pub session_id: String,
    /// Base URL of the speed test server
    pub server_url: String,
    /// Host details published by the server, when they could be fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,
    pub session: Session,
    pub rating: Rating,
}

impl RunReport {
    pub fn new(
        session_id: impl Into<String>,
        server_url: impl Into<String>,
        session: Session,
        rating: Rating,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            server_url: server_url.into(),
            server: None,
            session,
            rating,
        }
    }

    pub fn with_server_info(mut self, info: ServerInfo) -> Self {
        self.server = Some(info);
        self
    }

    /// Phases that ended in error.
    pub fn failed_phases(&self) -> Vec<Phase> {
        self.session.failed_phases()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurements::ThroughputResult;
    use crate::scoring::rate_session;
    use crate::session::TestSize;

    fn sample_session() -> Session {
        let mut session = Session::new(TestSize::new(10).unwrap());
        session.begin(Phase::Download);
        session.complete_download(ThroughputResult {
            speed_mbps: 94.2,
            bytes_transferred: 10 * 1024 * 1024,
            duration_seconds: 0.89,
        });
        session.begin(Phase::Upload);
        session.fail(Phase::Upload);
        session.begin(Phase::Latency);
        session.fail(Phase::Latency);
        session
    }

    #[test]
    fn test_report_serialization() {
        let session = sample_session();
        let rating = rate_session(&session);
        let report = RunReport::new(
            "client_abc123xyz",
            "http://127.0.0.1:8000",
            session,
            rating,
        );

        let json = report.to_json_pretty().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(value.get("timestamp").is_some());
        assert_eq!(value["session_id"], "client_abc123xyz");
        assert_eq!(value["session"]["download_status"], "completed");
        assert_eq!(value["session"]["upload_status"], "error");
        assert_eq!(value["session"]["download"]["speed_mbps"], 94.2);
        assert!(value["session"].get("upload").is_none());
        assert!(value.get("server").is_none());
        assert!(value["rating"].get("description").is_some());
    }

    #[test]
    fn test_report_carries_server_info() {
        let report = RunReport::new(
            "client_abc123xyz",
            "http://10.0.0.2:8000",
            Session::default(),
            rate_session(&Session::default()),
        )
        .with_server_info(ServerInfo {
            hostname: "bench".to_string(),
            ..ServerInfo::default()
        });

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"hostname\":\"bench\""));
    }

    #[test]
    fn test_failed_phases() {
        let session = sample_session();
        let rating = rate_session(&session);
        let report = RunReport::new("client_x", "http://h", session, rating);
        assert_eq!(report.failed_phases(), vec![Phase::Upload, Phase::Latency]);
    }
}
