//! Batch execution on top of [`Executor`].
//!
//! An unconfirmed batch only produces a [`BatchPreview`]. A confirmed batch runs every item
//! through the executor, in parallel (bounded) or strictly in order. Each item succeeds or fails
//! on its own and lands in the result slot of its input index. Cancellation or an expired deadline
//! stops the batch early; unfinished items are reported as [`BatchItem::Abandoned`].

use crate::error::Result;
use crate::executor::Executor;
use crate::model::{ApiDescriptor, ExecutionRequest, ExecutionResult, RequestParam};
use bridge_http_tools::config::ParamLocation;
use bridge_http_tools::guardrail::Guardrail;
use futures::StreamExt as _;
use futures::stream::FuturesUnordered;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// One call within a batch.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub path: String,
    pub method: Method,
    pub params: Vec<RequestParam>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Confirmation for this item alone; a confirmed batch does not confirm destructive items.
    pub confirmed: bool,
}

impl CallSpec {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            params: Vec::new(),
            body: None,
            headers: Vec::new(),
            confirmed: false,
        }
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.push(RequestParam::new(name, value));
        self
    }

    #[must_use]
    pub fn param_at(
        mut self,
        location: ParamLocation,
        name: impl Into<String>,
        value: Value,
    ) -> Self {
        self.params.push(RequestParam::at(location, name, value));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    /// `"METHOD path"`, as shown in previews.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

impl From<CallSpec> for ExecutionRequest {
    fn from(call: CallSpec) -> Self {
        Self {
            path: call.path,
            method: call.method,
            params: call.params,
            body: call.body,
            headers: call.headers,
            limit: None,
            offset: None,
            confirmed: call.confirmed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub parallel: bool,
    /// Without confirmation the batch is only previewed.
    pub confirmed: bool,
    /// In-flight ceiling for parallel mode; further capped by the API's batch size and rate.
    pub concurrency: Option<usize>,
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            confirmed: false,
            concurrency: None,
            deadline: None,
            cancel: None,
        }
    }
}

impl BatchOptions {
    #[must_use]
    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPreview {
    pub total_operations: usize,
    pub operations: Vec<String>,
    pub destructive_operations: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItem {
    /// The executor produced a result (which may itself be a failure or a guardrail block).
    Completed(ExecutionResult),
    /// The item was refused before any network activity (unknown endpoint, missing parameter).
    Rejected { error: String },
    /// The batch stopped before this item finished.
    Abandoned,
}

impl BatchItem {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(r) if r.is_success())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub results: Vec<BatchItem>,
    pub summary: BatchSummary,
    /// True when the batch was cancelled or ran out of time with items unfinished.
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchOutcome {
    Preview(BatchPreview),
    Completed(BatchResult),
}

#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    executor: Executor,
}

impl BatchCoordinator {
    #[must_use]
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Preview or run a batch against one API.
    ///
    /// # Errors
    ///
    /// Returns an error only if the API's guardrail settings are invalid; item failures are
    /// reported per item.
    pub async fn execute_batch(
        &self,
        api: &ApiDescriptor,
        calls: Vec<CallSpec>,
        options: BatchOptions,
    ) -> Result<BatchOutcome> {
        if !options.confirmed {
            return Ok(BatchOutcome::Preview(preview(api, &calls)?));
        }

        let total = calls.len();
        tracing::info!(
            api = %api.name,
            total,
            parallel = options.parallel,
            "Running batch"
        );

        let stop = stop_signal(options.cancel.clone(), options.deadline);
        tokio::pin!(stop);

        let mut slots: Vec<Option<BatchItem>> = (0..total).map(|_| None).collect();
        if options.parallel {
            let bound = options
                .concurrency
                .unwrap_or(DEFAULT_BATCH_CONCURRENCY)
                .min(api.settings.max_batch_size)
                .min(api.settings.rate_limit_per_second as usize)
                .max(1);
            let semaphore = Arc::new(Semaphore::new(bound));

            let mut pending: FuturesUnordered<_> = calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| {
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let Ok(_permit) = semaphore.acquire().await else {
                            return (index, BatchItem::Abandoned);
                        };
                        (index, run_item(&self.executor, api, call).await)
                    }
                })
                .collect();

            loop {
                tokio::select! {
                    biased;
                    () = &mut stop => break,
                    next = pending.next() => match next {
                        Some((index, item)) => slots[index] = Some(item),
                        None => break,
                    },
                }
            }
        } else {
            for (index, call) in calls.into_iter().enumerate() {
                tokio::select! {
                    biased;
                    () = &mut stop => break,
                    item = run_item(&self.executor, api, call) => slots[index] = Some(item),
                }
            }
        }

        let partial = slots.iter().any(Option::is_none);
        let results: Vec<BatchItem> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or(BatchItem::Abandoned))
            .collect();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let summary = BatchSummary {
            total,
            succeeded,
            failed: total - succeeded,
        };

        if partial {
            tracing::warn!(
                api = %api.name,
                total,
                succeeded,
                "Batch stopped before all items finished"
            );
        } else {
            tracing::info!(api = %api.name, total, succeeded, "Batch finished");
        }

        Ok(BatchOutcome::Completed(BatchResult {
            results,
            summary,
            partial,
        }))
    }
}

fn preview(api: &ApiDescriptor, calls: &[CallSpec]) -> Result<BatchPreview> {
    let guardrail = Guardrail::from_settings(&api.settings)?;
    let destructive = calls
        .iter()
        .filter(|c| guardrail.is_destructive(&c.method))
        .count();
    let mut message = format!(
        "Batch of {} operation(s) against '{}' was not executed. Re-run with confirmation to execute.",
        calls.len(),
        api.name
    );
    if destructive > 0 {
        message.push_str(&format!(
            " {destructive} destructive operation(s) also need their own confirmation."
        ));
    }
    Ok(BatchPreview {
        total_operations: calls.len(),
        operations: calls.iter().map(CallSpec::label).collect(),
        destructive_operations: destructive,
        message,
    })
}

async fn run_item(executor: &Executor, api: &ApiDescriptor, call: CallSpec) -> BatchItem {
    let label = call.label();
    match executor.execute(api, call.into()).await {
        Ok(result) => BatchItem::Completed(result),
        Err(e) => {
            tracing::warn!(api = %api.name, call = %label, error = %e, "Batch item rejected");
            BatchItem::Rejected {
                error: e.to_string(),
            }
        }
    }
}

/// Resolves once the batch must stop; never resolves when neither a token nor a deadline is set.
async fn stop_signal(cancel: Option<CancellationToken>, deadline: Option<Duration>) {
    let cancelled = async {
        match &cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };
    let expired = async {
        match deadline {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        () = cancelled => tracing::info!("Batch cancelled"),
        () = expired => tracing::info!("Batch deadline reached"),
    }
}
