use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use log::{error, info, warn};

use super::download::measure_download;
use super::latency::{probe_latency, DEFAULT_LATENCY_TIMEOUT};
use super::upload::measure_upload;
use crate::channel::RealtimeChannel;
use crate::errors::SpeedTestError;
use crate::report::ProgressReporter;
use crate::scoring::{rate_session, Rating};
use crate::server::SpeedTransport;
use crate::session::{Phase, PhaseStatus, Session, TestSize};

/// Configuration for the test engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Payload size for both throughput phases.
    /// Default: 100 MB
    pub size: TestSize,

    /// Upper bound on the latency phase.
    /// Default: 60 s
    pub latency_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            size: TestSize::default(),
            latency_timeout: DEFAULT_LATENCY_TIMEOUT,
        }
    }
}

/// What a finished run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub session: Session,
    pub rating: Rating,
    /// Errors of the phases that failed, in run order.
    pub failures: Vec<SpeedTestError>,
}

impl RunSummary {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Result of a call to [`Orchestrator::start`].
#[derive(Debug)]
pub enum StartOutcome {
    Completed(RunSummary),
    /// Another run was already in progress. Nothing was changed.
    Rejected,
}

/// Holds the running flag for the lifetime of one run.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Runs Download, Upload and Latency in order and rates the outcome.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use netspeed::channel::RealtimeChannel;
/// use netspeed::report::NullReporter;
/// use netspeed::server::HttpTransport;
/// use netspeed::speedtest::{EngineConfig, Orchestrator, StartOutcome};
///
/// # async fn run() -> Result<(), netspeed::errors::SpeedTestError> {
/// let url = url::Url::parse("http://127.0.0.1:8000").unwrap();
/// let transport = HttpTransport::new(url)?;
/// let channel = Arc::new(RealtimeChannel::with_generated_id());
/// let engine = Orchestrator::new(transport, channel, EngineConfig::default());
///
/// if let StartOutcome::Completed(summary) = engine.start(&NullReporter).await? {
///     println!("{}", summary.rating.label);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator<T> {
    transport: T,
    channel: Arc<RealtimeChannel>,
    config: EngineConfig,
    running: AtomicBool,
    session: Mutex<Session>,
}

impl<T: SpeedTransport> Orchestrator<T> {
    pub fn new(
        transport: T,
        channel: Arc<RealtimeChannel>,
        config: EngineConfig,
    ) -> Self {
        let session = Session::new(config.size);
        Self {
            transport,
            channel,
            config,
            running: AtomicBool::new(false),
            session: Mutex::new(session),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Copy of the current session state.
    pub fn session(&self) -> Session {
        self.with_session(|session| session.clone())
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session =
            self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    /// Run all three phases.
    ///
    /// Returns [`StartOutcome::Rejected`] when a run is already active. A
    /// failed phase is recorded in the session and the run continues; only
    /// a fault escaping the phases is returned as an error.
    pub async fn start(
        &self,
        reporter: &dyn ProgressReporter,
    ) -> Result<StartOutcome, SpeedTestError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("A run is already in progress, ignoring start request");
            return Ok(StartOutcome::Rejected);
        };

        match AssertUnwindSafe(self.run(reporter)).catch_unwind().await {
            Ok(summary) => Ok(StartOutcome::Completed(summary)),
            Err(_) => {
                error!("Speed test run aborted by an internal fault");
                Err(SpeedTestError::unknown("speed test run aborted unexpectedly"))
            }
        }
    }

    async fn run(&self, reporter: &dyn ProgressReporter) -> RunSummary {
        let size = self.config.size;
        self.with_session(|session| session.reset(size));
        for phase in Phase::ORDERED {
            reporter.on_phase_status(phase, PhaseStatus::Ready);
        }
        info!("Starting speed test run ({})", size);

        let mut failures = Vec::new();

        self.enter(Phase::Download, reporter);
        let outcome = measure_download(&self.transport, size, reporter).await;
        self.settle(Phase::Download, outcome, reporter, &mut failures, |s, r| {
            s.complete_download(r)
        });

        self.enter(Phase::Upload, reporter);
        let outcome = measure_upload(&self.transport, size, reporter).await;
        self.settle(Phase::Upload, outcome, reporter, &mut failures, |s, r| {
            s.complete_upload(r)
        });

        self.enter(Phase::Latency, reporter);
        let outcome =
            probe_latency(&self.channel, reporter, self.config.latency_timeout)
                .await;
        self.settle(Phase::Latency, outcome, reporter, &mut failures, |s, r| {
            s.complete_latency(r)
        });

        let session = self.session();
        let rating = rate_session(&session);
        info!(
            "Run finished: {} ({} phase(s) failed)",
            rating.label,
            failures.len()
        );
        reporter.on_run_complete(&session, &rating);

        RunSummary { session, rating, failures }
    }

    fn enter(&self, phase: Phase, reporter: &dyn ProgressReporter) {
        self.with_session(|session| session.begin(phase));
        reporter.on_phase_status(phase, PhaseStatus::Testing);
    }

    fn settle<R>(
        &self,
        phase: Phase,
        outcome: Result<R, SpeedTestError>,
        reporter: &dyn ProgressReporter,
        failures: &mut Vec<SpeedTestError>,
        complete: impl FnOnce(&mut Session, R),
    ) {
        let status = match outcome {
            Ok(result) => {
                self.with_session(|session| complete(session, result));
                PhaseStatus::Completed
            }
            Err(e) => {
                warn!("{} test failed: {}", phase, e.message);
                self.with_session(|session| session.fail(phase));
                failures.push(e.with_phase(phase));
                PhaseStatus::Error
            }
        };

        reporter.on_phase_status(phase, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::loopback::{LoopbackConnector, ProbeConfig};
    use crate::channel::supervisor::spawn_supervisor;
    use crate::channel::{ChannelProgress, ClientMessage, ServerMessage};
    use crate::errors::ErrorKind;
    use crate::measurements::LatencyResult;
    use crate::report::progress::testing::RecordingReporter;
    use crate::retry::RetryConfig;
    use crate::scoring::RatingLabel;
    use crate::server::{ByteStream, PingTransport, UploadReceipt};
    use futures::stream::{self, StreamExt};
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicUsize;
    use tokio::task::JoinHandle;

    const MIB: u64 = 1024 * 1024;

    /// Scriptable stand-in for the speed test server.
    #[derive(Default)]
    struct FakeServer {
        download_error: Option<fn() -> SpeedTestError>,
        panic_downloads: AtomicUsize,
        chunk_pause: Duration,
        upload_speed: Option<f64>,
        downloads: AtomicUsize,
    }

    impl SpeedTransport for FakeServer {
        async fn download(
            &self,
            size: TestSize,
        ) -> Result<ByteStream, SpeedTestError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if self.panic_downloads.load(Ordering::SeqCst) > 0 {
                self.panic_downloads.fetch_sub(1, Ordering::SeqCst);
                panic!("injected fault");
            }
            if let Some(error) = self.download_error {
                return Err(error());
            }

            let pause = self.chunk_pause;
            Ok(stream::iter(0..size.megabytes())
                .then(move |_| async move {
                    tokio::time::sleep(pause).await;
                    Ok(vec![0u8; MIB as usize])
                })
                .boxed())
        }

        async fn upload(
            &self,
            _size: TestSize,
            mut body: ByteStream,
        ) -> Result<UploadReceipt, SpeedTestError> {
            while let Some(chunk) = body.next().await {
                chunk?;
                tokio::time::sleep(self.chunk_pause).await;
            }
            Ok(UploadReceipt { speed_mbps: self.upload_speed, ..Default::default() })
        }
    }

    /// Peer that answers every start request with one progress frame and a
    /// 15 ms summary.
    fn attach_fake_peer(channel: &Arc<RealtimeChannel>) -> JoinHandle<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        channel.attach(tx);

        let channel = channel.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Ok(ClientMessage::StartTest { .. }) =
                    ClientMessage::from_json(&frame)
                else {
                    continue;
                };
                channel.deliver(ServerMessage::Progress(ChannelProgress {
                    phase: Phase::Latency,
                    progress_percent: 50.0,
                    metric: Some(15.0),
                    sample: Some(1),
                    total_samples: Some(2),
                    error: None,
                }));
                channel.deliver(ServerMessage::LatencyComplete(LatencyResult {
                    avg_ms: 15.0,
                    min_ms: 15.0,
                    max_ms: 15.0,
                    jitter_ms: 0.0,
                    packet_loss_percent: 0.0,
                    successful_pings: 2,
                    failed_pings: 0,
                    total_samples: 2,
                    samples: vec![15.0, 15.0],
                }));
            }
        })
    }

    fn small_config() -> EngineConfig {
        EngineConfig { size: TestSize::new(2).unwrap(), ..EngineConfig::default() }
    }

    /// Status changes after the reset that opens every run.
    fn statuses(reporter: &RecordingReporter) -> Vec<(Phase, PhaseStatus)> {
        reporter
            .statuses
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|(_, status)| *status != PhaseStatus::Ready)
            .collect()
    }

    fn ready_count(reporter: &RecordingReporter) -> usize {
        reporter
            .statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, status)| *status == PhaseStatus::Ready)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_completes_every_phase() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _peer = attach_fake_peer(&channel);
        let server = FakeServer {
            chunk_pause: Duration::from_millis(10),
            upload_speed: Some(60.0),
            ..Default::default()
        };
        let engine = Orchestrator::new(server, channel, small_config());
        let reporter = RecordingReporter::default();

        let summary = match engine.start(&reporter).await.unwrap() {
            StartOutcome::Completed(summary) => summary,
            StartOutcome::Rejected => panic!("run was rejected"),
        };

        assert!(summary.session.is_complete());
        assert!(!summary.is_partial());
        assert_eq!(summary.session.download_status, PhaseStatus::Completed);
        assert_eq!(summary.session.upload.as_ref().unwrap().speed_mbps, 60.0);
        assert_eq!(summary.session.latency.as_ref().unwrap().avg_ms, 15.0);
        // 2 MiB in 20 ms is ~839 Mbps (5), upload 60 (5), latency 15 (5).
        assert_eq!(summary.rating.label, RatingLabel::Excellent);

        assert_eq!(
            statuses(&reporter),
            vec![
                (Phase::Download, PhaseStatus::Testing),
                (Phase::Download, PhaseStatus::Completed),
                (Phase::Upload, PhaseStatus::Testing),
                (Phase::Upload, PhaseStatus::Completed),
                (Phase::Latency, PhaseStatus::Testing),
                (Phase::Latency, PhaseStatus::Completed),
            ]
        );
        assert_eq!(reporter.completions.lock().unwrap().len(), 1);
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic_and_ends_at_full() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _peer = attach_fake_peer(&channel);
        let server = FakeServer {
            chunk_pause: Duration::from_millis(5),
            ..Default::default()
        };
        let engine = Orchestrator::new(server, channel, small_config());
        let reporter = RecordingReporter::default();

        engine.start(&reporter).await.unwrap();

        for phase in Phase::ORDERED {
            let events = reporter.events_for(phase);
            assert!(!events.is_empty(), "no progress for {}", phase);
            for pair in events.windows(2) {
                assert!(pair[0].progress_percent <= pair[1].progress_percent);
            }
            assert_eq!(events.last().unwrap().progress_percent, 100.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_reports_every_phase_ready_first() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _peer = attach_fake_peer(&channel);
        let engine =
            Orchestrator::new(FakeServer::default(), channel, small_config());
        let reporter = RecordingReporter::default();

        engine.start(&reporter).await.unwrap();
        engine.start(&reporter).await.unwrap();

        let all = reporter.statuses.lock().unwrap().clone();
        let ready: Vec<(Phase, PhaseStatus)> = Phase::ORDERED
            .iter()
            .map(|phase| (*phase, PhaseStatus::Ready))
            .collect();
        assert_eq!(all[..3], ready[..]);
        // The second run starts with the same three Ready updates.
        assert_eq!(all[9..12], ready[..]);
        assert_eq!(ready_count(&reporter), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_transport_error_does_not_stop_run() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _peer = attach_fake_peer(&channel);
        let server = FakeServer {
            download_error: Some(|| SpeedTestError::network("connection reset")),
            upload_speed: Some(3.0),
            ..Default::default()
        };
        let engine = Orchestrator::new(server, channel, small_config());
        let reporter = RecordingReporter::default();

        let StartOutcome::Completed(summary) = engine.start(&reporter).await.unwrap()
        else {
            panic!("run was rejected");
        };

        assert_eq!(summary.session.download_status, PhaseStatus::Error);
        assert_eq!(summary.session.upload_status, PhaseStatus::Completed);
        assert_eq!(summary.session.latency_status, PhaseStatus::Completed);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, ErrorKind::Network);
        assert_eq!(summary.failures[0].phase, Some(Phase::Download));
        assert_eq!(summary.rating.label, RatingLabel::VeryGood);
        assert_eq!(
            statuses(&reporter)[..2],
            [
                (Phase::Download, PhaseStatus::Testing),
                (Phase::Download, PhaseStatus::Error),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_failure_does_not_stop_run() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _peer = attach_fake_peer(&channel);
        let server = FakeServer {
            download_error: Some(|| {
                SpeedTestError::http_status(StatusCode::SERVICE_UNAVAILABLE)
            }),
            upload_speed: Some(3.0),
            ..Default::default()
        };
        let engine = Orchestrator::new(server, channel, small_config());
        let reporter = RecordingReporter::default();

        let StartOutcome::Completed(summary) = engine.start(&reporter).await.unwrap()
        else {
            panic!("run was rejected");
        };

        assert_eq!(summary.session.download_status, PhaseStatus::Error);
        assert!(summary.session.download.is_none());
        assert_eq!(summary.session.upload_status, PhaseStatus::Completed);
        assert_eq!(summary.session.latency_status, PhaseStatus::Completed);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, ErrorKind::HttpStatus);
        assert_eq!(summary.failures[0].phase, Some(Phase::Download));
        // Upload 3 Mbps scores 3, latency 15 ms scores 5: average 4.
        assert_eq!(summary.rating.label, RatingLabel::VeryGood);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_channel_fails_only_latency() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let server = FakeServer::default();
        let engine = Orchestrator::new(server, channel, small_config());
        let reporter = RecordingReporter::default();

        let StartOutcome::Completed(summary) = engine.start(&reporter).await.unwrap()
        else {
            panic!("run was rejected");
        };

        assert_eq!(summary.session.latency_status, PhaseStatus::Error);
        assert_eq!(summary.failures[0].kind, ErrorKind::NotConnected);
        assert_eq!(summary.session.failed_phases(), vec![Phase::Latency]);
        assert!(summary.rating.average_score.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected_while_running() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _peer = attach_fake_peer(&channel);
        let server = FakeServer {
            chunk_pause: Duration::from_millis(50),
            ..Default::default()
        };
        let engine = Orchestrator::new(server, channel, small_config());
        let reporter = RecordingReporter::default();

        let (first, second) =
            tokio::join!(engine.start(&reporter), engine.start(&reporter));

        assert!(matches!(first.unwrap(), StartOutcome::Completed(_)));
        assert!(matches!(second.unwrap(), StartOutcome::Rejected));
        assert_eq!(engine.transport.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.completions.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escaped_fault_releases_running_flag() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _peer = attach_fake_peer(&channel);
        let server = FakeServer {
            panic_downloads: AtomicUsize::new(1),
            ..Default::default()
        };
        let engine = Orchestrator::new(server, channel, small_config());
        let reporter = RecordingReporter::default();

        let err = engine.start(&reporter).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(!engine.is_running());

        let outcome = engine.start(&reporter).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Completed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_run_resets_previous_results() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _peer = attach_fake_peer(&channel);
        let engine =
            Orchestrator::new(FakeServer::default(), channel.clone(), small_config());
        let reporter = RecordingReporter::default();

        engine.start(&reporter).await.unwrap();
        assert!(engine.session().latency.is_some());

        channel.detach();
        let StartOutcome::Completed(summary) = engine.start(&reporter).await.unwrap()
        else {
            panic!("run was rejected");
        };
        assert!(summary.session.latency.is_none());
        assert_eq!(summary.session.latency_status, PhaseStatus::Error);
    }

    /// Succeeds after 8 ms.
    struct SteadyPinger;

    impl PingTransport for SteadyPinger {
        async fn ping(&self, _timeout: Duration) -> Result<(), SpeedTestError> {
            tokio::time::sleep(Duration::from_millis(8)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_through_supervised_loopback_channel() {
        let channel = Arc::new(RealtimeChannel::new("client_test"));
        let _supervisor = spawn_supervisor(
            LoopbackConnector::new(
                Arc::new(SteadyPinger),
                ProbeConfig { samples: 3, ..ProbeConfig::default() },
            ),
            channel.clone(),
            RetryConfig::default(),
        );
        tokio::task::yield_now().await;
        assert!(channel.is_connected());

        let engine = Orchestrator::new(FakeServer::default(), channel, small_config());
        let reporter = RecordingReporter::default();

        let StartOutcome::Completed(summary) = engine.start(&reporter).await.unwrap()
        else {
            panic!("run was rejected");
        };

        let latency = summary.session.latency.unwrap();
        assert_eq!(latency.successful_pings, 3);
        assert!((latency.avg_ms - 8.0).abs() < 1.0);
        let percents: Vec<f64> = reporter
            .events_for(Phase::Latency)
            .iter()
            .map(|e| e.progress_percent)
            .collect();
        assert_eq!(percents.last(), Some(&100.0));
    }
}
