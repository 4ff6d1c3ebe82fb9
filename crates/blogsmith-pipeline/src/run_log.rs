use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use blogsmith_core::event::EventBus;
use blogsmith_core::types::{PipelineEvent, RunId};

/// JSONL run logger.
///
/// Subscribes to the EventBus and writes one JSON object per line. The file
/// is append-only, so everything written before a crash stays readable.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pass: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl LogEntry {
    fn new(run_id: &str, event_type: &'static str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            event_type,
            stage: None,
            pass: None,
            detail: None,
        }
    }
}

impl RunLogger {
    /// Create a new RunLogger.
    ///
    /// Logs are written to `{log_dir}/{run_id}/{timestamp}.jsonl`.
    /// `level` controls verbosity: 1=run summary, 2=+routing, 3=+every stage.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Start logging in a background task.
    ///
    /// The bus subscription is taken before this returns, so no event
    /// published afterwards is missed. The task writes JSONL until
    /// cancellation or RunComplete/RunError.
    pub fn spawn(
        self,
        event_bus: &EventBus,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.write_events(rx, run_id, cancel))
    }

    async fn write_events(
        self,
        mut rx: broadcast::Receiver<PipelineEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) {
        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");

        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let Some(entry) = self.event_to_entry(&run_id.0, &event) else {
                                continue;
                            };

                            if let Ok(json) = serde_json::to_string(&entry) {
                                let line = format!("{}\n", json);
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                                // Flush after each entry for crash resilience
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush log");
                                }
                            }

                            if event.is_terminal() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert a PipelineEvent to a log entry (None if filtered by level).
    fn event_to_entry(&self, run_id: &str, event: &PipelineEvent) -> Option<LogEntry> {
        match event {
            // L1: run summary
            PipelineEvent::RunStarted { topic, .. } => Some(LogEntry {
                detail: Some(serde_json::json!({ "topic": topic })),
                ..LogEntry::new(run_id, "run_started")
            }),
            PipelineEvent::RunComplete {
                passes, elapsed_ms, ..
            } => Some(LogEntry {
                pass: Some(*passes),
                detail: Some(serde_json::json!({ "elapsed_ms": elapsed_ms })),
                ..LogEntry::new(run_id, "run_complete")
            }),
            PipelineEvent::RunError { error, .. } => Some(LogEntry {
                detail: Some(serde_json::json!({ "error": error })),
                ..LogEntry::new(run_id, "run_error")
            }),

            // L2: routing
            PipelineEvent::RouteDecided { pass, score, route } if self.level >= 2 => {
                Some(LogEntry {
                    pass: Some(*pass),
                    detail: Some(serde_json::json!({ "score": score, "route": route })),
                    ..LogEntry::new(run_id, "route_decided")
                })
            }
            PipelineEvent::PassesExhausted { passes, best_pass } if self.level >= 2 => {
                Some(LogEntry {
                    pass: Some(*passes),
                    detail: Some(serde_json::json!({ "best_pass": best_pass })),
                    ..LogEntry::new(run_id, "passes_exhausted")
                })
            }

            // L3: every stage
            PipelineEvent::StageStarted { stage, pass } if self.level >= 3 => Some(LogEntry {
                stage: Some(stage.to_string()),
                pass: Some(*pass),
                ..LogEntry::new(run_id, "stage_started")
            }),
            PipelineEvent::StageCompleted {
                stage,
                pass,
                update,
                elapsed_ms,
            } if self.level >= 3 => {
                let fields: serde_json::Map<String, serde_json::Value> = update
                    .fields()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), truncate_str(&v, 200).into()))
                    .collect();
                Some(LogEntry {
                    stage: Some(stage.to_string()),
                    pass: Some(*pass),
                    detail: Some(serde_json::json!({
                        "elapsed_ms": elapsed_ms,
                        "fields": fields,
                    })),
                    ..LogEntry::new(run_id, "stage_completed")
                })
            }

            _ => None,
        }
    }
}

/// Truncate a string for logging, on a char boundary.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
