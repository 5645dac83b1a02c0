//! Best-effort conversation compaction.
//!
//! Keeps the rolling model context under a usable-token budget by replacing
//! older history with a model-generated summary. Compaction is pure over the
//! history (it returns a new message list or leaves the original untouched)
//! and it never propagates errors: a failed compaction logs a warning and the
//! agent carries on with the history it had.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use canopy_abstraction::{ChatClient, ChatMessage, ChatRole};

use crate::token_counter::{create_counter, CounterStrategy, TokenCounter};

/// Marker prepended to the summary message so it is recognizable in history.
const SUMMARY_MARKER: &str = "[CONTEXT SUMMARY]";

/// System prompt for the summarization call.
const COMPACTION_SYSTEM_PROMPT: &str = "\
You are a context compression assistant. Your job is to create BRIEF summaries of conversation history.

Focus on information needed to continue the conversation: what was done, what is in progress, which files and identifiers are involved, and what comes next. The continuation will not have access to the original messages.

Instructions:
1. Your summary MUST be substantially shorter than the original text: aim for 20-30% of its length.
2. Use bullet points or telegraphic prose.
3. Write in the first person, as the assistant continuing its own work.
4. Preserve file paths, identifiers, and decisions exactly.
5. Do not introduce new plans or speculation.
6. Prioritize: key decisions > outcomes > context > details.";

/// Configuration for the compaction engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Whether compaction runs at all.
    pub enabled: bool,
    /// Fraction of the usable budget that triggers compaction, in (0, 1].
    pub threshold: f64,
    /// Number of recent non-system messages never summarized.
    pub protect_recent: usize,
    /// Tokens reserved for the model's reply when computing the usable budget.
    pub reserved_output_tokens: usize,
    /// Context window sizes by model name.
    pub context_limits: HashMap<String, usize>,
    /// Token counter selection.
    pub counter_strategy: CounterStrategy,
    /// Validation-failure retries (with 1s, 2s backoff).
    pub max_retries: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        let context_limits = HashMap::from([
            ("gpt-4".to_string(), 8_192),
            ("gpt-4-turbo".to_string(), 128_000),
            ("gpt-4o".to_string(), 128_000),
            ("gpt-3.5-turbo".to_string(), 16_385),
            ("deepseek-chat".to_string(), 65_536),
            ("claude-3-5-sonnet".to_string(), 200_000),
        ]);
        Self {
            enabled: true,
            threshold: 0.75,
            protect_recent: 2,
            reserved_output_tokens: 4_000,
            context_limits,
            counter_strategy: CounterStrategy::Auto,
            max_retries: 1,
        }
    }
}

impl CompactionConfig {
    /// Looks up the context limit for a model: exact match first, then the
    /// longest configured prefix.
    #[must_use]
    pub fn context_limit(&self, model: &str) -> Option<usize> {
        if let Some(limit) = self.context_limits.get(model) {
            return Some(*limit);
        }
        self.context_limits
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, limit)| *limit)
    }

    /// Adds or overrides a context limit.
    #[must_use]
    pub fn with_context_limit(mut self, model: impl Into<String>, limit: usize) -> Self {
        self.context_limits.insert(model.into(), limit);
        self
    }
}

/// History split into the three compaction groups.
struct Partition {
    /// Every system message, preserved verbatim and in order.
    systems: Vec<ChatMessage>,
    /// Older non-system messages to be summarized.
    summarizable: Vec<ChatMessage>,
    /// The protected recent tail, kept verbatim.
    protected: Vec<ChatMessage>,
}

/// The compaction engine: detection, summarization, validation.
pub struct Compactor {
    config: CompactionConfig,
    counter: Box<dyn TokenCounter>,
}

impl Compactor {
    /// Creates a compactor for the given configuration.
    #[must_use]
    pub fn new(config: CompactionConfig) -> Self {
        let counter = create_counter(config.counter_strategy);
        Self { config, counter }
    }

    /// The configuration this compactor runs under.
    #[must_use]
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Checks whether the history has crossed the compaction threshold.
    ///
    /// Returns `false` when compaction is disabled or the model's context
    /// limit is unknown (usable budget ≤ 0).
    #[must_use]
    pub fn should_compact(&self, history: &[ChatMessage], model: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(limit) = self.config.context_limit(model) else {
            debug!(model, "No context limit configured; skipping compaction check");
            return false;
        };
        let usable = limit.saturating_sub(self.config.reserved_output_tokens);
        if usable == 0 {
            return false;
        }
        let current = self.counter.count_messages(history, model);
        let budget = (usable as f64 * self.config.threshold) as usize;
        current > budget
    }

    /// Compacts the history if needed, writing the result back into the
    /// client on success.
    ///
    /// Returns `true` when a compaction committed. Never errors.
    pub async fn maybe_compact(&self, client: &mut dyn ChatClient) -> bool {
        let history = client.history();
        let model = client.model_id().to_string();
        if !self.should_compact(&history, &model) {
            return false;
        }

        let before_tokens = self.counter.count_messages(&history, &model);
        info!(
            model = %model,
            before_tokens,
            messages = history.len(),
            "Compaction triggered"
        );

        match self.compact_history(&history, client).await {
            Some(compacted) => {
                let after_tokens = self.counter.count_messages(&compacted, &model);
                info!(
                    before_tokens,
                    after_tokens,
                    before_messages = history.len(),
                    after_messages = compacted.len(),
                    "Compaction committed"
                );
                client.set_history(compacted);
                true
            }
            None => false,
        }
    }

    /// Produces a compacted history, or `None` if compaction was skipped or
    /// failed validation.
    ///
    /// Pure over the input: the original slice is never mutated.
    pub async fn compact_history(
        &self,
        history: &[ChatMessage],
        client: &dyn ChatClient,
    ) -> Option<Vec<ChatMessage>> {
        if !self.config.enabled {
            return None;
        }

        let partition = self.partition(history);
        if partition.summarizable.is_empty() {
            debug!("Nothing to summarize; skipping compaction");
            return None;
        }

        let model = client.model_id().to_string();
        let original_tokens = self.counter.count_messages(history, &model);

        let attempts = 1 + self.config.max_retries;
        for attempt in 1..=attempts {
            if attempt > 1 {
                // Exponential backoff: 1s, 2s, ...
                let delay = Duration::from_secs(1 << (attempt - 2).min(4));
                tokio::time::sleep(delay).await;
            }

            let Some(summary) = self.summarize(&partition.summarizable, client).await else {
                warn!(attempt, "Summary generation failed");
                continue;
            };

            let mut compacted = partition.systems.clone();
            compacted.push(ChatMessage::new(
                ChatRole::Assistant,
                format!("{SUMMARY_MARKER}\n{summary}"),
            ));
            compacted.extend(partition.protected.iter().cloned());

            let compacted_tokens = self.counter.count_messages(&compacted, &model);
            if compacted_tokens < original_tokens {
                return Some(compacted);
            }

            warn!(
                attempt,
                original_tokens,
                compacted_tokens,
                "Compacted history not smaller than original; discarding"
            );
        }

        warn!("Compaction failed after {attempts} attempt(s); history left intact");
        None
    }

    /// Splits history into systems / summarizable / protected.
    fn partition(&self, history: &[ChatMessage]) -> Partition {
        let systems: Vec<ChatMessage> =
            history.iter().filter(|m| m.role == ChatRole::System).cloned().collect();
        let non_system: Vec<ChatMessage> =
            history.iter().filter(|m| m.role != ChatRole::System).cloned().collect();

        let split = non_system.len().saturating_sub(self.config.protect_recent);
        let (summarizable, protected) = non_system.split_at(split);

        Partition {
            systems,
            summarizable: summarizable.to_vec(),
            protected: protected.to_vec(),
        }
    }

    /// Generates a summary of the given messages on a scratch client.
    async fn summarize(
        &self,
        messages: &[ChatMessage],
        client: &dyn ChatClient,
    ) -> Option<String> {
        let model = client.model_id().to_string();
        let original_tokens = self.counter.count_messages(messages, &model);
        let target_words = (original_tokens * 3 / 10).max(50);

        let transcript: Vec<String> = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
            .collect();

        let prompt = format!(
            "Summarize the following conversation in AT MOST {target_words} words:\n\n{}\n\n\
             IMPORTANT: Your summary must be MUCH shorter than the original. \
             Focus only on the most critical information. \
             Target length: {target_words} words maximum.",
            transcript.join("\n\n")
        );

        let mut scratch = client.scratch();
        match scratch.chat(&prompt, Some(COMPACTION_SYSTEM_PROMPT), ChatRole::User).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Summarization call failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor").field("config", &self.config).finish_non_exhaustive()
    }
}
