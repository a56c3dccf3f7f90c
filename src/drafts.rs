use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ports::{DraftContext, GenerationProvider};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DraftStatus {
    Loading,
    Success,
    Error(String),
}

/// One candidate review text from one provider. Created in `Loading` status,
/// settled exactly once by its owning provider task, then only mutated by
/// explicit user edits of `text`.
#[derive(Debug, Clone, Serialize)]
pub struct DraftItem {
    pub id: String,
    pub provider_name: String,
    pub text: String,
    /// First successful text, kept for revert.
    pub original_text: String,
    pub status: DraftStatus,
}

impl DraftItem {
    fn loading(provider_name: &str, index: usize) -> Self {
        Self {
            id: format!("{}-{}", provider_name.to_ascii_lowercase(), index),
            provider_name: provider_name.to_string(),
            text: String::new(),
            original_text: String::new(),
            status: DraftStatus::Loading,
        }
    }

    /// User edit of the draft text. Does not change status; only settled
    /// successful drafts are editable.
    pub fn edit_text(&mut self, text: impl Into<String>) {
        if self.status == DraftStatus::Success {
            self.text = text.into();
        }
    }

    pub fn revert(&mut self) {
        if self.status == DraftStatus::Success {
            self.text = self.original_text.clone();
        }
    }
}

/// Handle on an in-progress fan-out. The full draft list exists from the
/// moment of creation, so callers can render `Loading` placeholders before
/// any provider returns.
pub struct DraftBatch {
    items: Arc<Mutex<Vec<DraftItem>>>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl DraftBatch {
    pub fn snapshot(&self) -> Vec<DraftItem> {
        self.items.lock().clone()
    }

    /// Waits for every provider task and returns the settled list. Provider
    /// failures are already folded into per-item statuses; this never errors.
    /// A task that dies without settling (panic or abort) has its remaining
    /// items marked as errors here, so nothing stays `Loading` past `wait`.
    pub async fn wait(self) -> Vec<DraftItem> {
        for (provider, task) in self.tasks {
            if let Err(err) = task.await {
                warn!(%provider, %err, "draft provider task aborted");
                settle_failure(&self.items, &provider, "draft generation aborted");
            }
        }
        Arc::try_unwrap(self.items)
            .map(|mutex| mutex.into_inner())
            .unwrap_or_else(|shared| shared.lock().clone())
    }
}

/// Launches one concurrent task per provider, each asked for
/// `drafts_per_provider` drafts in a single call. Items are filled
/// positionally per provider; one provider's failure never touches another
/// provider's items.
pub fn start_drafts(
    providers: &[Arc<dyn GenerationProvider>],
    context: DraftContext,
    drafts_per_provider: usize,
) -> DraftBatch {
    let mut initial = Vec::with_capacity(providers.len() * drafts_per_provider);
    for provider in providers {
        for index in 0..drafts_per_provider {
            initial.push(DraftItem::loading(provider.name(), index));
        }
    }
    let items = Arc::new(Mutex::new(initial));

    let tasks = providers
        .iter()
        .map(|provider| {
            let provider = Arc::clone(provider);
            let items = Arc::clone(&items);
            let context = context.clone();
            let name = provider.name().to_string();
            let task = {
                let name = name.clone();
                tokio::spawn(async move {
                    match provider.generate_drafts(&context, drafts_per_provider).await {
                        Ok(texts) => {
                            debug!(provider = %name, drafts = texts.len(), "provider drafts ready");
                            settle_success(&items, &name, texts);
                        }
                        Err(err) => {
                            warn!(provider = %name, %err, "provider draft generation failed");
                            settle_failure(&items, &name, &err.to_string());
                        }
                    }
                })
            };
            (name, task)
        })
        .collect();

    DraftBatch { items, tasks }
}

/// Convenience wrapper for callers that do not render placeholders.
pub async fn generate_drafts(
    providers: &[Arc<dyn GenerationProvider>],
    context: DraftContext,
    drafts_per_provider: usize,
) -> Vec<DraftItem> {
    start_drafts(providers, context, drafts_per_provider)
        .wait()
        .await
}

fn settle_success(items: &Mutex<Vec<DraftItem>>, provider: &str, texts: Vec<String>) {
    let mut items = items.lock();
    let mut texts = texts.into_iter();
    for item in items
        .iter_mut()
        .filter(|item| item.provider_name == provider && item.status == DraftStatus::Loading)
    {
        match texts.next() {
            Some(text) => {
                item.text = text.clone();
                item.original_text = text;
                item.status = DraftStatus::Success;
            }
            None => {
                item.status = DraftStatus::Error("not enough drafts returned".into());
            }
        }
    }
}

fn settle_failure(items: &Mutex<Vec<DraftItem>>, provider: &str, message: &str) {
    let mut items = items.lock();
    for item in items
        .iter_mut()
        .filter(|item| item.provider_name == provider && item.status == DraftStatus::Loading)
    {
        item.status = DraftStatus::Error(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::errors::GenerationError;

    use super::*;

    struct ScriptedProvider {
        name: &'static str,
        outcome: Result<Vec<String>, String>,
        delay_ms: u64,
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate_drafts(
            &self,
            _context: &DraftContext,
            _count: usize,
        ) -> Result<Vec<String>, GenerationError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            match &self.outcome {
                Ok(texts) => Ok(texts.clone()),
                Err(message) => Err(GenerationError::Api {
                    provider: self.name.to_string(),
                    message: message.clone(),
                }),
            }
        }
    }

    fn provider(
        name: &'static str,
        outcome: Result<Vec<String>, String>,
        delay_ms: u64,
    ) -> Arc<dyn GenerationProvider> {
        Arc::new(ScriptedProvider {
            name,
            outcome,
            delay_ms,
        })
    }

    fn context() -> DraftContext {
        DraftContext {
            place_name: "Corner Cafe".into(),
            address: None,
            rating: Some(5),
            notes: None,
            photos: Vec::new(),
        }
    }

    #[tokio::test]
    async fn materializes_loading_placeholders_up_front() {
        let providers = vec![
            provider("Gemini", Ok(vec!["a".into(), "b".into()]), 100),
            provider("Claude", Ok(vec!["c".into(), "d".into()]), 100),
        ];
        let batch = start_drafts(&providers, context(), 2);

        let snapshot = batch.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.iter().all(|item| item.status == DraftStatus::Loading));

        let settled = batch.wait().await;
        assert!(settled.iter().all(|item| item.status == DraftStatus::Success));
    }

    #[tokio::test]
    async fn one_provider_failure_never_touches_the_other() {
        let providers = vec![
            provider("Gemini", Err("rate limited".into()), 0),
            provider("Claude", Ok(vec!["good one".into(), "better one".into()]), 0),
        ];
        let items = generate_drafts(&providers, context(), 2).await;

        let errors: Vec<_> = items
            .iter()
            .filter(|item| matches!(item.status, DraftStatus::Error(_)))
            .collect();
        let successes: Vec<_> = items
            .iter()
            .filter(|item| item.status == DraftStatus::Success)
            .collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(successes.len(), 2);
        assert!(errors.iter().all(|item| item.provider_name == "Gemini"));
        assert!(successes.iter().all(|item| item.provider_name == "Claude"));
    }

    #[tokio::test]
    async fn short_responses_mark_the_remainder() {
        let providers = vec![provider("Claude", Ok(vec!["only one".into()]), 0)];
        let items = generate_drafts(&providers, context(), 3).await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].status, DraftStatus::Success);
        assert_eq!(items[0].text, "only one");
        for item in &items[1..] {
            assert_eq!(
                item.status,
                DraftStatus::Error("not enough drafts returned".into())
            );
        }
    }

    #[tokio::test]
    async fn drafts_fill_positionally_per_provider() {
        let providers = vec![
            provider("Gemini", Ok(vec!["g1".into(), "g2".into()]), 20),
            provider("Claude", Ok(vec!["c1".into(), "c2".into()]), 0),
        ];
        let items = generate_drafts(&providers, context(), 2).await;

        let texts_for = |name: &str| {
            items
                .iter()
                .filter(|item| item.provider_name == name)
                .map(|item| item.text.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(texts_for("Gemini"), vec!["g1", "g2"]);
        assert_eq!(texts_for("Claude"), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn edits_keep_status_and_revert_restores_original() {
        let providers = vec![provider("Claude", Ok(vec!["first".into()]), 0)];
        let mut items = generate_drafts(&providers, context(), 1).await;

        let item = &mut items[0];
        item.edit_text("polished version");
        assert_eq!(item.status, DraftStatus::Success);
        assert_eq!(item.text, "polished version");

        item.revert();
        assert_eq!(item.text, "first");
        assert_eq!(item.original_text, "first");
    }

    #[tokio::test]
    async fn dead_provider_task_leaves_no_loading_items() {
        struct DyingProvider;

        #[async_trait]
        impl GenerationProvider for DyingProvider {
            fn name(&self) -> &str {
                "Gemini"
            }

            async fn generate_drafts(
                &self,
                _context: &DraftContext,
                _count: usize,
            ) -> Result<Vec<String>, GenerationError> {
                panic!("provider task died");
            }
        }

        let providers: Vec<Arc<dyn GenerationProvider>> = vec![
            Arc::new(DyingProvider),
            provider("Claude", Ok(vec!["c1".into(), "c2".into()]), 0),
        ];
        let items = generate_drafts(&providers, context(), 2).await;

        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|item| item.status != DraftStatus::Loading));
        assert!(items
            .iter()
            .filter(|item| item.provider_name == "Gemini")
            .all(|item| item.status
                == DraftStatus::Error("draft generation aborted".into())));
        assert!(items
            .iter()
            .filter(|item| item.provider_name == "Claude")
            .all(|item| item.status == DraftStatus::Success));
    }

    #[tokio::test]
    async fn loading_items_reject_edits() {
        let mut item = DraftItem::loading("Gemini", 0);
        item.edit_text("should not stick");
        assert_eq!(item.text, "");
        assert_eq!(item.status, DraftStatus::Loading);
    }
}
