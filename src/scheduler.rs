use crate::clock::Clock;
use crate::config::{JobIntervals, PostingConfig};
use crate::pipeline::IngestionPipeline;
use crate::publish::PublishLoop;
use crate::refresher::CredentialRefresher;
use crate::slots::upcoming_slots;
use crate::store::Store;
use crate::types::{IngestReport, NewLogEntry, Post, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Publish logs and feed items older than this are swept daily.
pub const RETENTION_DAYS: i64 = 30;

pub const JOB_FEED_INGEST: &str = "feed-ingest";
pub const JOB_POST_PUBLISH: &str = "post-publish";
pub const JOB_CLEANUP: &str = "cleanup";
pub const JOB_CREDENTIAL_REFRESH: &str = "credential-refresh";

/// One entry in the job registry.
#[derive(Debug, Clone, Copy)]
pub struct JobSpec {
    pub name: &'static str,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<String>,
}

/// Owns the four background timers (ingestion, publishing, cleanup,
/// credential refresh) and the manual triggers the dashboard surface calls.
/// Each job runs as its own sequential loop: a job never overlaps itself,
/// while different jobs interleave freely at await points.
pub struct Scheduler {
    store: Arc<Store>,
    pipeline: Arc<IngestionPipeline>,
    publish_loop: Arc<PublishLoop>,
    refresher: Arc<CredentialRefresher>,
    posting: PostingConfig,
    intervals: JobIntervals,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        pipeline: Arc<IngestionPipeline>,
        publish_loop: Arc<PublishLoop>,
        refresher: Arc<CredentialRefresher>,
        posting: PostingConfig,
        intervals: JobIntervals,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            pipeline,
            publish_loop,
            refresher,
            posting,
            intervals,
            clock,
            running: AtomicBool::new(false),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The job registry: every background timer, by name and cadence.
    pub fn jobs(&self) -> Vec<JobSpec> {
        vec![
            JobSpec {
                name: JOB_FEED_INGEST,
                interval: self.intervals.ingest,
            },
            JobSpec {
                name: JOB_POST_PUBLISH,
                interval: self.intervals.publish,
            },
            JobSpec {
                name: JOB_CLEANUP,
                interval: self.intervals.cleanup,
            },
            JobSpec {
                name: JOB_CREDENTIAL_REFRESH,
                interval: self.intervals.refresh,
            },
        ]
    }

    /// Starts all timers. Idempotent: a running scheduler is left alone.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }
        let _ = self.shutdown.send(false);

        info!("Starting scheduler");

        let pipeline = self.pipeline.clone();
        let store = self.store.clone();
        let ingest = self.spawn_job(JOB_FEED_INGEST, self.intervals.ingest, move || {
            let pipeline = pipeline.clone();
            let store = store.clone();
            async move {
                if let Err(e) = pipeline.run().await {
                    error!("Scheduled feed ingestion failed: {}", e);
                    let entry = NewLogEntry::error(None, "feed ingestion failed", Some(e.to_string()));
                    if let Err(e) = store.record_log(entry).await {
                        error!("Failed to record ingestion error: {}", e);
                    }
                }
            }
        });

        let publish_loop = self.publish_loop.clone();
        let store = self.store.clone();
        let publish = self.spawn_job(JOB_POST_PUBLISH, self.intervals.publish, move || {
            let publish_loop = publish_loop.clone();
            let store = store.clone();
            async move {
                if let Err(e) = publish_loop.run().await {
                    error!("Scheduled publishing failed: {}", e);
                    let entry =
                        NewLogEntry::error(None, "scheduled publishing failed", Some(e.to_string()));
                    if let Err(e) = store.record_log(entry).await {
                        error!("Failed to record publish error: {}", e);
                    }
                }
            }
        });

        let store = self.store.clone();
        let clock = self.clock.clone();
        let cleanup = self.spawn_job(JOB_CLEANUP, self.intervals.cleanup, move || {
            let store = store.clone();
            let clock = clock.clone();
            async move {
                let cutoff = clock.now() - ChronoDuration::days(RETENTION_DAYS);
                if let Err(e) = store.cleanup(cutoff).await {
                    error!("Scheduled cleanup failed: {}", e);
                }
            }
        });

        let refresher = self.refresher.clone();
        let store = self.store.clone();
        let refresh = self.spawn_job(
            JOB_CREDENTIAL_REFRESH,
            self.intervals.refresh,
            move || {
                let refresher = refresher.clone();
                let store = store.clone();
                async move {
                    if let Err(e) = refresher.run().await {
                        error!("Credential refresh check failed: {}", e);
                        let entry =
                            NewLogEntry::error(None, "credential refresh failed", Some(e.to_string()));
                        if let Err(e) = store.record_log(entry).await {
                            error!("Failed to record refresh error: {}", e);
                        }
                    }
                }
            },
        );

        let mut handles = self.handles.lock().unwrap();
        handles.extend([ingest, publish, cleanup, refresh]);
        info!("Scheduler started with {} jobs", handles.len());
    }

    /// Stops all timers. In-flight runs complete; no new runs start. Safe to
    /// call at any time, including while a run is mid-flight.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping scheduler");
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap();
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Job task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    fn spawn_job<F, Fut>(&self, name: &'static str, period: Duration, task: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; consume
            // it so jobs run on cadence rather than all at startup.
            ticker.tick().await;
            info!("Job {} scheduled every {:?}", name, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Job {} firing", name);
                        task().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Job {} stopped", name);
                            break;
                        }
                    }
                }
            }
        })
    }

    // Manual triggers, invoked by the CLI/dashboard surface out-of-band.

    pub async fn trigger_ingest(&self) -> Result<IngestReport> {
        info!("Manual feed ingestion triggered");
        self.pipeline.run().await
    }

    pub async fn trigger_publish(&self) -> Result<usize> {
        info!("Manual publish run triggered");
        self.publish_loop.run().await
    }

    /// Moves a post's slot to now so the next publish run picks it up.
    pub async fn schedule_immediately(&self, post_id: uuid::Uuid) -> Result<Post> {
        let post = self
            .store
            .set_post_schedule(post_id, self.clock.now())
            .await?;
        info!("Post '{}' scheduled for immediate publishing", post.title);
        Ok(post)
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.running.load(Ordering::SeqCst);
        SchedulerStatus {
            running,
            jobs: if running {
                self.jobs().iter().map(|j| j.name.to_string()).collect()
            } else {
                Vec::new()
            },
        }
    }

    /// The next few posting slots, for the status surface.
    pub fn next_schedule(&self, count: usize) -> Vec<DateTime<Utc>> {
        upcoming_slots(
            &self.posting.days,
            self.posting.time,
            self.clock.now(),
            count,
        )
    }
}
