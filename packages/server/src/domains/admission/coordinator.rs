//! The admission coordinator: one state machine per request.
//!
//! Gate order is fixed and observable: credential, rate, quota, then the
//! request is normalized and feature-gated, then cache, then origin behind
//! the single-flight front. A request that fails an earlier gate never
//! touches a later one. Every attempt, admitted or rejected, leaves exactly
//! one usage record naming the gate that settled it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use origin_client::models::{ExtractRequest, ExtractionPayload};
use origin_client::OriginError;
use uuid::Uuid;

use super::error::{AdmissionError, GateStage};
use super::quota::QuotaLedger;
use super::rate_limiter::{RateDecision, RateLimiter};
use crate::domains::accounts::credentials::CredentialValidator;
use crate::domains::accounts::models::account::Account;
use crate::domains::usage::models::usage_record::{UsageRecord, OUTCOME_ADMITTED};
use crate::domains::usage::store::UsageStore;
use crate::kernel::cache::{canonical_target, fingerprint, CacheStore, SingleFlight};
use crate::kernel::origin::OriginFetcher;

/// Phases of the admission state machine, in the order a request moves
/// through them. Rejections are terminal; [`AdmissionError::gate`] names the
/// phase that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPhase {
    Start,
    CredentialOk,
    RateOk,
    QuotaOk,
    CacheHit,
    CacheMiss,
    Origin,
    Admitted,
}

/// What the caller asked for, before normalization.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub url: String,
    pub include_metadata: bool,
    pub detect_region: bool,
}

/// Request-scoped context recorded into the usage trail.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub endpoint: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// A fully admitted request.
#[derive(Debug, Clone)]
pub struct AdmissionSuccess {
    pub payload: ExtractionPayload,
    pub cached: bool,
    pub requests_remaining: i64,
    pub duration_ms: i64,
}

pub struct AdmissionCoordinator {
    validator: CredentialValidator,
    rate_limiter: RateLimiter,
    ledger: QuotaLedger,
    cache: Arc<dyn CacheStore>,
    flights: SingleFlight<Result<ExtractionPayload, AdmissionError>>,
    origin: Arc<dyn OriginFetcher>,
    usage: Arc<dyn UsageStore>,
    cache_ttl: Duration,
}

impl AdmissionCoordinator {
    pub fn new(
        validator: CredentialValidator,
        rate_limiter: RateLimiter,
        ledger: QuotaLedger,
        cache: Arc<dyn CacheStore>,
        origin: Arc<dyn OriginFetcher>,
        usage: Arc<dyn UsageStore>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            validator,
            rate_limiter,
            ledger,
            cache,
            flights: SingleFlight::new(),
            origin,
            usage,
            cache_ttl,
        }
    }

    /// Drive one request through the pipeline.
    pub async fn admit(
        &self,
        credential: &str,
        request: &AdmissionRequest,
        ctx: &RequestContext,
    ) -> Result<AdmissionSuccess, AdmissionError> {
        let started = Instant::now();
        trace_phase(AdmissionPhase::Start);

        let account = match self.validator.validate(credential).await {
            Ok(account) => account,
            Err(err) => {
                self.record(None, request, ctx, Err(&err), false, started)
                    .await;
                return Err(err);
            }
        };
        trace_phase(AdmissionPhase::CredentialOk);

        match self.gated(&account, request).await {
            Ok((payload, cached, requests_remaining)) => {
                trace_phase(AdmissionPhase::Admitted);
                self.record(Some(&account), request, ctx, Ok(()), cached, started)
                    .await;
                Ok(AdmissionSuccess {
                    payload,
                    cached,
                    requests_remaining,
                    duration_ms: started.elapsed().as_millis() as i64,
                })
            }
            Err(err) => {
                self.record(Some(&account), request, ctx, Err(&err), false, started)
                    .await;
                Err(err)
            }
        }
    }

    /// Everything past the credential gate, in fixed order. Returns the
    /// payload, whether it came from cache, and the remaining quota.
    async fn gated(
        &self,
        account: &Account,
        request: &AdmissionRequest,
    ) -> Result<(ExtractionPayload, bool, i64), AdmissionError> {
        let limits = account.plan.limits();

        if let RateDecision::Limited { retry_after_secs } = self
            .rate_limiter
            .check_and_record(account.id, limits.per_minute)
            .await
        {
            return Err(AdmissionError::RateLimited { retry_after_secs });
        }
        trace_phase(AdmissionPhase::RateOk);

        let grant = self.ledger.check_and_consume(account.id).await?;
        trace_phase(AdmissionPhase::QuotaOk);

        // Normalize and feature-gate before any shared cache state is
        // touched, so an unentitled request cannot warm a premium slot.
        let canonical = canonical_target(&request.url).ok_or_else(|| {
            AdmissionError::NotFound(format!("invalid target url: {}", request.url))
        })?;
        if request.detect_region && !limits.region_detection {
            return Err(AdmissionError::PlanForbidden {
                feature: "region detection".to_string(),
            });
        }

        let key = fingerprint(&canonical, request.include_metadata, request.detect_region);

        match self.cache.lookup(&key).await {
            Ok(Some(payload)) => {
                trace_phase(AdmissionPhase::CacheHit);
                return Ok((payload, true, grant.remaining));
            }
            Ok(None) => trace_phase(AdmissionPhase::CacheMiss),
            Err(err) => {
                // Cache trouble degrades to bypass, never to rejection.
                tracing::warn!(error = %err, "cache lookup failed, bypassing cache");
                trace_phase(AdmissionPhase::CacheMiss);
            }
        }

        trace_phase(AdmissionPhase::Origin);
        let payload = self
            .flights
            .run(&key, {
                let origin = Arc::clone(&self.origin);
                let cache = Arc::clone(&self.cache);
                let ttl = self.cache_ttl;
                let extract = ExtractRequest {
                    url: canonical,
                    include_metadata: request.include_metadata,
                    detect_region: request.detect_region,
                };
                async move { fetch_and_store(origin, cache, ttl, extract).await }
            })
            .await?;

        Ok((payload, false, grant.remaining))
    }

    /// Emit the one usage record for this attempt. Failures here are logged
    /// and swallowed; the caller already has their answer.
    async fn record(
        &self,
        account: Option<&Account>,
        request: &AdmissionRequest,
        ctx: &RequestContext,
        outcome: Result<(), &AdmissionError>,
        cached: bool,
        started: Instant,
    ) {
        let (outcome, gate, status_code, error) = match outcome {
            Ok(()) => {
                let gate = if cached { GateStage::Cache } else { GateStage::Origin };
                (OUTCOME_ADMITTED.to_string(), gate, 200, None)
            }
            Err(err) => (
                err.kind().to_string(),
                err.gate(),
                err.status_code() as i32,
                Some(err.to_string()),
            ),
        };

        let record = UsageRecord {
            id: Uuid::new_v4(),
            account_id: account.map(|a| a.id),
            email: account.map(|a| a.email.clone()),
            credential_prefix: account.map(|a| a.credential_prefix.clone()),
            endpoint: ctx.endpoint.clone(),
            target_url: Some(request.url.clone()),
            outcome,
            gate: gate.as_str().to_string(),
            status_code,
            cached,
            duration_ms: started.elapsed().as_millis() as i64,
            client_ip: ctx.client_ip.clone(),
            user_agent: ctx.user_agent.clone(),
            error,
            recorded_at: Utc::now(),
        };

        if let Err(err) = self.usage.record(&record).await {
            tracing::warn!(error = %err, "failed to write usage record");
        }
    }
}

fn trace_phase(phase: AdmissionPhase) {
    tracing::trace!(?phase, "admission phase");
}

/// The single-flight body: origin fetch with one retry on transient
/// failure, then a best-effort cache store.
async fn fetch_and_store(
    origin: Arc<dyn OriginFetcher>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    request: ExtractRequest,
) -> Result<ExtractionPayload, AdmissionError> {
    let result = match origin.fetch(&request).await {
        Err(OriginError::Transient(detail)) => {
            tracing::debug!(detail, "transient origin failure, retrying once");
            origin.fetch(&request).await
        }
        other => other,
    };

    let payload = result.map_err(|err| match err {
        OriginError::NotFound(detail) => AdmissionError::NotFound(detail),
        OriginError::Forbidden(detail) => AdmissionError::PlanForbidden { feature: detail },
        OriginError::Transient(detail) | OriginError::Permanent(detail) => {
            AdmissionError::OriginFailed(detail)
        }
    })?;

    let key = fingerprint(&request.url, request.include_metadata, request.detect_region);
    if let Err(err) = cache.store(&key, &payload, ttl).await {
        tracing::warn!(error = %err, "cache store failed, serving uncached");
    }

    Ok(payload)
}
