use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use strato_bus::{Envelope, EventBus};
use strato_metrics::metrics::{Counter, Histogram};
use strato_metrics::Metrics;
use strato_primitives::oracle::{DataSource, OracleRequest, RequestStatus};
use strato_primitives::Scope;
use strato_provider::StorageProvider;
use strato_tasks::TaskSpawner;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::runner::RunnerClient;
use super::transport::{OracleTransport, RenderedCall, TransportError};
use super::{OracleConfig, LOG_TARGET};
use crate::topics;

#[derive(Metrics)]
#[metrics(scope = "oracle.dispatcher")]
pub(super) struct DispatcherMetrics {
    /// Fetch attempts across all requests.
    pub(super) attempts: Counter,
    /// Requests that reached `succeeded`.
    pub(super) successes: Counter,
    /// Requests that reached `failed`.
    pub(super) failures: Counter,
    /// Attempts rescheduled with backoff.
    pub(super) retries: Counter,
    /// Requests that reached `expired`.
    pub(super) expirations: Counter,
    /// Requests moved to the dead-letter queue.
    pub(super) dead_letters: Counter,
    /// Wall-clock duration of one attempt.
    pub(super) attempt_seconds: Histogram,
}

/// The dispatcher half of the oracle service: claims due requests, renders
/// and fires the HTTP call, applies the retry/TTL/DLQ state machine, and
/// invokes the runner callback on success.
pub(super) struct DispatcherInner {
    pub(super) storage: Arc<dyn StorageProvider>,
    pub(super) transport: Arc<dyn OracleTransport>,
    pub(super) runner: Option<RunnerClient>,
    pub(super) events: EventBus,
    pub(super) config: OracleConfig,
    pub(super) permits: Semaphore,
    pub(super) metrics: DispatcherMetrics,
}

impl DispatcherInner {
    /// One claim-and-dispatch pass. Attempts within a request stay serial
    /// because a request is claimed by exactly one worker at a time.
    pub(super) async fn run_cycle(self: &Arc<Self>, now: DateTime<Utc>, spawner: &TaskSpawner) {
        let claimed = match self
            .storage
            .claim_due_requests(now, self.config.batch, &self.config.worker_id)
            .await
        {
            Ok(claimed) => claimed,
            Err(err) => {
                warn!(target: LOG_TARGET, %err, "Claim pass failed.");
                return;
            }
        };

        for request in claimed {
            let Ok(permit) = self.permits.try_acquire() else {
                // Saturated pool: release the claim by rescheduling the
                // request untouched; it stays pending for the next cycle.
                let untouched = request.clone();
                if let Err(err) = self.storage.update_request(untouched).await {
                    warn!(target: LOG_TARGET, request = %request.id, %err, "Claim release failed.");
                }
                continue;
            };
            permit.forget();

            let inner = Arc::clone(self);
            spawner.build_task().name("oracle-attempt").spawn(async move {
                inner.attempt(request, Utc::now()).await;
                inner.permits.add_permits(1);
            });
        }
    }

    /// Runs one attempt of a claimed request and persists the outcome.
    pub(super) async fn attempt(&self, mut request: OracleRequest, now: DateTime<Utc>) {
        let begun = std::time::Instant::now();
        self.metrics.attempts.increment(1);

        if now > request.ttl_expires_at {
            self.metrics.expirations.increment(1);
            request.status = RequestStatus::Expired;
            request.error = Some("ttl expired".to_owned());
            self.finish(request, now).await;
            return;
        }

        let scope = Scope::new(request.tenant.clone(), request.account_id.clone());
        let source = match self.storage.source(&scope, &request.source_id).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                self.metrics.failures.increment(1);
                request.status = RequestStatus::Failed;
                request.error = Some("data source no longer exists".to_owned());
                self.finish(request, now).await;
                return;
            }
            Err(err) => {
                warn!(target: LOG_TARGET, request = %request.id, %err, "Source load failed.");
                self.reschedule(request, now).await;
                return;
            }
        };

        let call = render_call(&source, &request, self.config.runner_token.as_deref());
        let outcome = self.transport.fetch(&call).await;
        self.metrics.attempt_seconds.record(begun.elapsed().as_secs_f64());

        match outcome {
            Ok(response) if (200..300).contains(&response.status) => {
                match serde_json::from_str::<serde_json::Value>(&response.body) {
                    Ok(result) => {
                        self.metrics.successes.increment(1);
                        request.status = RequestStatus::Succeeded;
                        request.result = Some(result.clone());
                        let id = request.id.clone();
                        self.finish(request, now).await;

                        self.events.publish(
                            topics::ORACLE_SUCCEEDED,
                            Envelope::new(
                                topics::ORACLE_SUCCEEDED,
                                json!({"request_id": id, "result": result}),
                            ),
                        );

                        if let Some(runner) = &self.runner {
                            if let Err(err) = runner.notify(&id, &result).await {
                                warn!(
                                    target: LOG_TARGET,
                                    request = %id,
                                    %err,
                                    "Runner callback failed."
                                );
                            }
                        }
                    }
                    Err(_) => {
                        // A 2xx with an unparseable body is terminal.
                        self.metrics.failures.increment(1);
                        request.status = RequestStatus::Failed;
                        request.error = Some("malformed response payload".to_owned());
                        self.finish(request, now).await;
                    }
                }
            }
            // 408 and 429 behave like transport-level retriables.
            Ok(response) if matches!(response.status, 408 | 429) || response.status >= 500 => {
                self.reschedule(request, now).await;
            }
            Ok(response) => {
                self.metrics.failures.increment(1);
                request.status = RequestStatus::Failed;
                request.error = Some(format!("http {}", response.status));
                self.finish(request, now).await;
            }
            Err(TransportError::Timeout) | Err(TransportError::Network(_)) => {
                self.reschedule(request, now).await;
            }
        }
    }

    /// Retriable failure: bump attempts, back off exponentially, and move
    /// to the DLQ once the budget is exhausted.
    async fn reschedule(&self, mut request: OracleRequest, now: DateTime<Utc>) {
        request.attempts += 1;

        if request.attempts >= self.config.max_attempts {
            self.metrics.dead_letters.increment(1);
            request.status = RequestStatus::Dead;
            request.error = Some(format!("exhausted {} attempts", request.attempts));
            let id = request.id.clone();
            let tenant = request.tenant.clone();
            self.finish(request, now).await;

            self.events.publish(
                topics::ORACLE_DLQ,
                Envelope::new(topics::ORACLE_DLQ, json!({"request_id": id, "tenant": tenant})),
            );
            return;
        }

        self.metrics.retries.increment(1);
        let backoff = self.backoff(request.attempts);
        request.next_attempt_at = now
            + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::seconds(1));
        debug!(
            target: LOG_TARGET,
            request = %request.id,
            attempts = request.attempts,
            ?backoff,
            "Attempt failed; rescheduled."
        );
        self.finish(request, now).await;
    }

    async fn finish(&self, mut request: OracleRequest, now: DateTime<Utc>) {
        request.updated_at = now;
        if let Err(err) = self.storage.update_request(request.clone()).await {
            warn!(target: LOG_TARGET, request = %request.id, %err, "Persisting outcome failed.");
        }
    }

    /// Exponential backoff: `base * 2^(attempts-1)`, capped.
    fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.config.backoff_base.saturating_mul(factor).min(self.config.backoff_cap)
    }
}

/// Renders the HTTP call from the bound data source. `{{payload}}` in the
/// body template interpolates the request payload; a template-less POST
/// sends the payload verbatim.
fn render_call(
    source: &DataSource,
    request: &OracleRequest,
    runner_token: Option<&str>,
) -> RenderedCall {
    let payload_json = request.payload.to_string();

    let body = match &source.body_template {
        Some(template) => Some(template.replace("{{payload}}", &payload_json)),
        None if source.method.eq_ignore_ascii_case("post") => Some(payload_json),
        None => None,
    };

    let mut headers: Vec<(String, String)> =
        source.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    if let Some(token) = runner_token {
        headers.push((super::runner::RUNNER_TOKEN_HEADER.to_owned(), token.to_owned()));
    }

    RenderedCall { url: source.url.clone(), method: source.method.clone(), headers, body }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn source(template: Option<&str>, method: &str) -> DataSource {
        let now = Utc::now();
        DataSource {
            id: strato_primitives::id::SourceId::new("s"),
            account_id: strato_primitives::id::AccountId::new("a"),
            tenant: strato_primitives::TenantId::new("t"),
            name: "price".into(),
            url: "https://example.com/quote".into(),
            method: method.into(),
            headers: BTreeMap::from([("X-Api-Key".to_owned(), "k".to_owned())]),
            body_template: template.map(str::to_owned),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn request() -> OracleRequest {
        let now = Utc::now();
        OracleRequest {
            id: strato_primitives::id::RequestId::new("r"),
            account_id: strato_primitives::id::AccountId::new("a"),
            tenant: strato_primitives::TenantId::new("t"),
            source_id: strato_primitives::id::SourceId::new("s"),
            payload: json!({"pair": "NEO/USD"}),
            status: RequestStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            ttl_expires_at: now,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn template_interpolates_payload() {
        let call = render_call(
            &source(Some(r#"{"query": {{payload}}}"#), "POST"),
            &request(),
            Some("tok"),
        );
        assert_eq!(call.body.as_deref(), Some(r#"{"query": {"pair":"NEO/USD"}}"#));
        assert!(call.headers.contains(&("X-Api-Key".into(), "k".into())));
        assert!(call
            .headers
            .contains(&(super::super::runner::RUNNER_TOKEN_HEADER.to_owned(), "tok".into())));
    }

    #[test]
    fn templateless_post_sends_payload_verbatim() {
        let call = render_call(&source(None, "POST"), &request(), None);
        assert_eq!(call.body.as_deref(), Some(r#"{"pair":"NEO/USD"}"#));
    }

    #[test]
    fn templateless_get_has_no_body() {
        let call = render_call(&source(None, "GET"), &request(), None);
        assert!(call.body.is_none());
    }
}
