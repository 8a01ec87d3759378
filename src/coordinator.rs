//! Component F: owns a build's [`crate::supervisor::ServerSupervisor`] and
//! [`crate::crawl::Engine`] for its whole lifetime and guarantees the server is torn down on
//! every exit path, success or failure.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::rt::{Discover, RtcStatic};
use crate::crawl::{CrawlStats, Engine, Outcome, UrlRecord};
use crate::error::FledgeError;
use crate::materializer::{self, Materializer};
use crate::supervisor::ServerSupervisor;

/// The result of one `fledge static` build.
pub struct BuildSummary {
    pub records: Vec<UrlRecord>,
    pub duration: Duration,
    pub aborted: bool,
}

impl BuildSummary {
    /// The count of records matching `outcome`, for the end-of-build report.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    /// The process exit code: `0` clean, `3` if any permanent or network failure was recorded,
    /// `130` if cancellation cut the build short. Config and boot failures never produce a
    /// `BuildSummary` at all; the caller maps those separately.
    pub fn exit_code(&self) -> u8 {
        if self.aborted {
            130
        } else if self
            .records
            .iter()
            .any(|r| matches!(r.outcome, Outcome::FailedPermanent | Outcome::FailedNetwork))
        {
            3
        } else {
            0
        }
    }
}

/// Runs exactly one build: validate, copy assets, boot the server, crawl, materialize, tear down.
pub struct Coordinator {
    rtc: RtcStatic,
    cancellation: CancellationToken,
}

impl Coordinator {
    pub fn new(rtc: RtcStatic, cancellation: CancellationToken) -> Self {
        Self { rtc, cancellation }
    }

    pub async fn run(self) -> Result<BuildSummary, FledgeError> {
        let Coordinator { rtc, cancellation } = self;
        let started = Instant::now();

        let RtcStatic {
            server,
            routes,
            discover,
            base_path,
            assets_dir,
            output_dir,
            max_concurrency,
            request_timeout,
            supervisor: supervisor_config,
        } = rtc;

        let asset_paths = match &assets_dir {
            Some(dir) => materializer::copy_assets_into(&output_dir, dir).await?,
            None => Default::default(),
        };

        let mut supervisor = ServerSupervisor::new(server, supervisor_config, cancellation.clone());
        let origin = match supervisor.boot().await {
            Ok(origin) => origin,
            Err(err) => {
                // The child may still be alive (e.g. a readiness timeout) even though boot
                // failed; tear it down before surfacing the error.
                supervisor.kill().await.ok();
                return Err(FledgeError::Boot(err));
            }
        };

        tracing::info!(%origin, "server ready, beginning crawl");

        let crawl_result = Self::crawl(
            &origin,
            routes,
            discover,
            &base_path,
            output_dir,
            asset_paths,
            max_concurrency,
            request_timeout,
            cancellation,
        )
        .await;

        supervisor.kill().await.ok();

        let stats = crawl_result?;
        Ok(BuildSummary {
            records: stats.records,
            duration: started.elapsed(),
            aborted: stats.aborted,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn crawl(
        origin: &Url,
        routes: Vec<String>,
        discover: Discover,
        base_path: &str,
        output_dir: std::path::PathBuf,
        asset_paths: std::collections::HashSet<std::path::PathBuf>,
        max_concurrency: usize,
        request_timeout: Duration,
        cancellation: CancellationToken,
    ) -> Result<CrawlStats, FledgeError> {
        let mut materializer = Materializer::new(output_dir, base_path.to_string(), origin.clone(), asset_paths);
        let mut engine = Engine::new(origin.clone(), discover, max_concurrency, request_timeout, cancellation)
            .map_err(|source| FledgeError::Io(std::io::Error::other(source)))?;
        engine.run(routes, &mut materializer).await.map_err(Self::map_crawl_error)
    }

    /// Recover a typed `FledgeError` (notably `OutputCollision`) from the engine's `anyhow::Result`
    /// chain if one is present, so a fatal materializer error surfaces as its own variant instead
    /// of the generic `Fatal` catch-all.
    fn map_crawl_error(err: anyhow::Error) -> FledgeError {
        match err.downcast::<FledgeError>() {
            Ok(fledge_err) => fledge_err,
            Err(err) => FledgeError::Fatal(err),
        }
    }
}
