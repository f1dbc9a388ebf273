//! Generation orchestration over the provider registry.
//!
//! The [`Orchestrator`] owns a read-only registry of adapters, built once, and
//! a handle to the usage [`Recorder`]. Every adapter call runs under the
//! configured request timeout. Fan-out operations run one task per adapter
//! and capture failures per slot.

use crate::model::{
    Capability, GenerationRequest, GenerationResult, HealthReport, ModelDescriptor, TextStream,
};
use crate::providers::{Provider, build_providers};
use crate::settings::Settings;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storage::{
    Conversation, ConversationSummary, GroupBy, NewConversation, Recorder, UsageFilter,
    UsageRecord, UsageSummary,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_COST_ALERT_THRESHOLD: f64 = 10.0;

/// One slot of a [`Orchestrator::compare_models`] run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub model: String,
    pub provider: String,
    #[serde(flatten)]
    pub outcome: ComparisonOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ComparisonOutcome {
    Completed {
        content: String,
        tokens: u32,
        cost: f64,
        latency_ms: f64,
    },
    Failed {
        error: String,
    },
}

impl ComparisonResult {
    fn failed(model: &str, provider: &str, error: impl ToString) -> Self {
        Self {
            model: model.to_string(),
            provider: provider.to_string(),
            outcome: ComparisonOutcome::Failed {
                error: error.to_string(),
            },
        }
    }

    fn completed(result: GenerationResult) -> Self {
        Self {
            model: result.model,
            provider: result.provider,
            outcome: ComparisonOutcome::Completed {
                content: result.content,
                tokens: result.usage.total_tokens,
                cost: result.cost,
                latency_ms: result.latency_ms,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ComparisonOutcome::Completed { .. })
    }
}

/// Usage-ledger writes that must never fail a generation.
#[derive(Clone)]
struct Ledger {
    recorder: Arc<dyn Recorder>,
    cost_tracking: bool,
    alert_threshold: f64,
}

impl Ledger {
    fn record(&self, result: &GenerationResult) {
        if !self.cost_tracking {
            return;
        }

        if let Err(e) = self.recorder.log_usage(&result.usage_record()) {
            warn!(
                provider = %result.provider,
                model = %result.model,
                error = %e,
                "failed to record usage"
            );
            return;
        }

        match self.recorder.total_cost() {
            Ok(total) if total > self.alert_threshold => warn!(
                total_cost = total,
                threshold = self.alert_threshold,
                "cost alert: total spend exceeds threshold"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to read total cost"),
        }
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    recorder: Arc<dyn Recorder>,
    providers: Vec<Arc<dyn Provider>>,
    request_timeout: Duration,
    cost_tracking: bool,
    cost_alert_threshold: f64,
}

impl OrchestratorBuilder {
    fn new(recorder: Arc<dyn Recorder>) -> Self {
        Self {
            recorder,
            providers: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cost_tracking: true,
            cost_alert_threshold: DEFAULT_COST_ALERT_THRESHOLD,
        }
    }

    /// Register an adapter. A second adapter with the same name replaces the
    /// first but keeps its registration slot.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        match self
            .providers
            .iter_mut()
            .find(|p| p.name() == provider.name())
        {
            Some(slot) => *slot = provider,
            None => self.providers.push(provider),
        }
        self
    }

    /// Take timeout and cost-tracking values from resolved settings.
    pub fn settings(self, settings: &Settings) -> Self {
        self.request_timeout(settings.request_timeout())
            .cost_tracking(settings.cost_tracking)
            .cost_alert_threshold(settings.cost_alert_threshold)
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cost_tracking(mut self, enabled: bool) -> Self {
        self.cost_tracking = enabled;
        self
    }

    pub fn cost_alert_threshold(mut self, threshold: f64) -> Self {
        self.cost_alert_threshold = threshold;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            providers: self.providers,
            ledger: Ledger {
                recorder: self.recorder,
                cost_tracking: self.cost_tracking,
                alert_threshold: self.cost_alert_threshold,
            },
            request_timeout: self.request_timeout,
        }
    }
}

/// Routes generation calls to registered adapters and records usage.
pub struct Orchestrator {
    /// Registration order; lookups are by name.
    providers: Vec<Arc<dyn Provider>>,
    ledger: Ledger,
    request_timeout: Duration,
}

impl Orchestrator {
    pub fn builder(recorder: Arc<dyn Recorder>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(recorder)
    }

    /// Build every enabled adapter from settings.
    ///
    /// Adapters that fail to construct are logged and left out; the rest
    /// still serve.
    pub fn from_settings(settings: &Settings, recorder: Arc<dyn Recorder>) -> Self {
        let mut builder = Self::builder(recorder).settings(settings);

        for (name, built) in build_providers(&settings.providers) {
            match built {
                Ok(provider) => {
                    info!(provider = name, "provider registered");
                    builder = builder.provider(provider);
                }
                Err(e) => {
                    let e = Error::Construction {
                        provider: name.to_string(),
                        message: e.to_string(),
                    };
                    error!(provider = name, error = %e, "provider disabled");
                }
            }
        }

        debug!(
            smart_routing = settings.smart_routing,
            prefer_local_models = settings.prefer_local_models,
            fallback_to_cloud = settings.fallback_to_cloud,
            rate_limit_enabled = settings.rate_limit_enabled,
            requests_per_minute = settings.requests_per_minute,
            "routing settings (not enforced)"
        );

        builder.build()
    }

    /// Registered provider names in registration order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    fn provider(&self, name: &str) -> Result<&Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    async fn bounded<T>(&self, provider: &str, call: impl Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| Error::Timeout {
                provider: provider.to_string(),
                after: self.request_timeout,
            })
    }

    /// Models across all (or one) providers, optionally narrowed to a capability.
    ///
    /// Never fails: an adapter that errors, hangs past the timeout, or panics
    /// contributes nothing.
    pub async fn list_models(
        &self,
        provider: Option<&str>,
        capability: Option<Capability>,
    ) -> Vec<ModelDescriptor> {
        let mut tasks = JoinSet::new();
        let selected = self
            .providers
            .iter()
            .filter(|p| provider.is_none_or(|name| p.name() == name));

        for (index, adapter) in selected.enumerate() {
            let adapter = Arc::clone(adapter);
            let timeout = self.request_timeout;
            tasks.spawn(async move {
                let name = adapter.name().to_string();
                match tokio::time::timeout(timeout, adapter.list_models()).await {
                    Ok(models) => (index, models),
                    Err(_) => {
                        warn!(provider = %name, "model listing timed out");
                        (index, Vec::new())
                    }
                }
            });
        }

        let mut slots: Vec<(usize, Vec<ModelDescriptor>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(slot) => slots.push(slot),
                Err(e) => warn!(error = %e, "model listing task failed"),
            }
        }
        slots.sort_by_key(|(index, _)| *index);

        slots
            .into_iter()
            .flat_map(|(_, models)| models)
            .filter(|m| capability.is_none_or(|c| m.supports(c)))
            .collect()
    }

    pub async fn get_model_info(
        &self,
        model: &str,
        provider: &str,
    ) -> Result<Option<ModelDescriptor>> {
        let adapter = self.provider(provider)?;
        self.bounded(provider, adapter.get_model_info(model)).await
    }

    /// One generation, recorded in the usage ledger on success.
    pub async fn generate(
        &self,
        provider: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResult> {
        let adapter = self.provider(provider)?;
        let result = self
            .bounded(provider, adapter.generate(request))
            .await?
            .map_err(|e| Error::generation(provider, e))?;

        self.ledger.record(&result);
        Ok(result)
    }

    /// Streamed generation. Streams are not recorded in the usage ledger.
    pub fn generate_stream(&self, provider: &str, request: &GenerationRequest) -> Result<TextStream> {
        Ok(self.provider(provider)?.generate_stream(request))
    }

    /// Run the same prompt against several `(model, provider)` pairs at once.
    ///
    /// The output has one slot per input pair, in input order. Dropping the
    /// returned future aborts any generations still in flight.
    pub async fn compare_models(
        &self,
        targets: &[(String, String)],
        prompt: &str,
        temperature: f64,
    ) -> Vec<ComparisonResult> {
        let mut slots: Vec<Option<ComparisonResult>> = vec![None; targets.len()];
        let mut tasks = JoinSet::new();

        for (index, (model, provider)) in targets.iter().enumerate() {
            let adapter = match self.provider(provider) {
                Ok(adapter) => Arc::clone(adapter),
                Err(e) => {
                    slots[index] = Some(ComparisonResult::failed(model, provider, e));
                    continue;
                }
            };

            let request = GenerationRequest::new(model.as_str())
                .with_prompt(prompt)
                .with_temperature(temperature);
            let ledger = self.ledger.clone();
            let timeout = self.request_timeout;
            let (model, provider) = (model.clone(), provider.clone());

            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, adapter.generate(&request)).await {
                    Ok(Ok(result)) => {
                        ledger.record(&result);
                        ComparisonResult::completed(result)
                    }
                    Ok(Err(e)) => {
                        ComparisonResult::failed(&model, &provider, Error::generation(&provider, e))
                    }
                    Err(_) => ComparisonResult::failed(
                        &model,
                        &provider,
                        Error::Timeout {
                            provider: provider.clone(),
                            after: timeout,
                        },
                    ),
                };
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "comparison task failed"),
            }
        }

        slots
            .into_iter()
            .zip(targets)
            .map(|(slot, (model, provider))| {
                slot.unwrap_or_else(|| {
                    ComparisonResult::failed(model, provider, "generation task failed")
                })
            })
            .collect()
    }

    /// Probe every provider concurrently. A provider that hangs or panics is
    /// reported unhealthy without holding up the others.
    pub async fn health_check_all(&self) -> BTreeMap<String, HealthReport> {
        let mut tasks = JoinSet::new();

        for adapter in &self.providers {
            let adapter = Arc::clone(adapter);
            let timeout = self.request_timeout;
            tasks.spawn(async move {
                let name = adapter.name().to_string();
                let report = match tokio::time::timeout(timeout, adapter.health_check()).await {
                    Ok(report) => report,
                    Err(_) => HealthReport::unhealthy(
                        name.as_str(),
                        Error::Timeout {
                            provider: name.clone(),
                            after: timeout,
                        }
                        .to_string(),
                    ),
                };
                (name, report)
            });
        }

        let mut reports = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, report)) => {
                    reports.insert(name, report);
                }
                Err(e) => warn!(error = %e, "health check task failed"),
            }
        }

        for adapter in &self.providers {
            reports
                .entry(adapter.name().to_string())
                .or_insert_with(|| HealthReport::unhealthy(adapter.name(), "health check task failed"));
        }

        reports
    }

    pub fn usage_stats(&self, group_by: GroupBy) -> Result<Vec<UsageSummary>> {
        Ok(self.ledger.recorder.aggregated_stats(group_by)?)
    }

    pub fn usage_records(&self, filter: &UsageFilter) -> Result<Vec<UsageRecord>> {
        Ok(self.ledger.recorder.usage_records(filter)?)
    }

    /// Upsert a conversation and return its id.
    pub fn save_conversation(&self, conversation: NewConversation) -> Result<String> {
        self.ledger.recorder.save_conversation(&conversation)?;
        Ok(conversation.id)
    }

    pub fn list_conversations(&self, limit: u32, offset: u32) -> Result<Vec<ConversationSummary>> {
        Ok(self.ledger.recorder.list_conversations(limit, offset)?)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.ledger.recorder.get_conversation(id)?)
    }

    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        Ok(self.ledger.recorder.delete_conversation(id)?)
    }
}
