//! Scriptable resource provider for testing.

use crate::application::ports::{ProviderDeletion, ProviderError, ResourceProvider};
use crate::domain::resource::ExternalId;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Response = Result<ProviderDeletion, ProviderError>;

#[derive(Debug)]
struct State {
    scripted: HashMap<ExternalId, VecDeque<Response>>,
    default: Response,
    delay: Option<Duration>,
    calls: Vec<ExternalId>,
    in_flight: HashMap<ExternalId, usize>,
    max_concurrent_per_id: usize,
}

/// Mock provider that answers from a per-id script.
///
/// Scripted responses are consumed in order; once an id's script runs out,
/// the default response is used (initially `Ok(Deleted)`). Every call is
/// logged, and the highest number of simultaneous calls for a single id is
/// tracked so tests can check that deletions never overlap.
///
/// ```
/// use quota_reconcile::infrastructure::mocks::MockProvider;
/// use quota_reconcile::application::ports::{ProviderDeletion, ProviderError};
///
/// let provider = MockProvider::new();
/// provider.script("ext-1", [
///     Err(ProviderError::Unavailable("502".into())),
///     Ok(ProviderDeletion::NotFound),
/// ]);
/// assert_eq!(provider.call_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockProvider {
    state: Arc<Mutex<State>>,
}

impl MockProvider {
    /// Create a provider that deletes everything.
    pub fn new() -> Self {
        Self::with_default(Ok(ProviderDeletion::Deleted))
    }

    /// Create a provider whose unscripted answer is `response`.
    pub fn with_default(response: Response) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                scripted: HashMap::new(),
                default: response,
                delay: None,
                calls: Vec::new(),
                in_flight: HashMap::new(),
                max_concurrent_per_id: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .expect("MockProvider mutex poisoned - a test thread panicked while holding the lock")
    }

    /// Queue responses for one external id.
    pub fn script(&self, external_id: &str, responses: impl IntoIterator<Item = Response>) {
        self.state()
            .scripted
            .entry(ExternalId::new(external_id))
            .or_default()
            .extend(responses);
    }

    /// Replace the unscripted answer.
    pub fn set_default(&self, response: Response) {
        self.state().default = response;
    }

    /// Make every call take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Every external id the provider was asked to delete, in call order.
    pub fn calls(&self) -> Vec<ExternalId> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn calls_for(&self, external_id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|id| id.as_str() == external_id)
            .count()
    }

    /// Highest number of overlapping calls seen for any single id.
    pub fn max_concurrent_per_id(&self) -> usize {
        self.state().max_concurrent_per_id
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProvider for MockProvider {
    async fn delete_resource(&self, external_id: &ExternalId) -> Response {
        let (delay, response) = {
            let mut state = self.state();
            state.calls.push(external_id.clone());
            let in_flight = {
                let count = state.in_flight.entry(external_id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            state.max_concurrent_per_id = state.max_concurrent_per_id.max(in_flight);

            let scripted = state
                .scripted
                .get_mut(external_id)
                .and_then(|queue| queue.pop_front());
            let response = scripted.unwrap_or_else(|| state.default.clone());
            (state.delay, response)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(count) = self.state().in_flight.get_mut(external_id) {
            *count = count.saturating_sub(1);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_default() {
        let provider = MockProvider::new();
        provider.script("a", [Ok(ProviderDeletion::NotFound)]);
        let id = ExternalId::new("a");

        assert_eq!(
            provider.delete_resource(&id).await,
            Ok(ProviderDeletion::NotFound)
        );
        assert_eq!(
            provider.delete_resource(&id).await,
            Ok(ProviderDeletion::Deleted)
        );
        assert_eq!(provider.calls_for("a"), 2);
    }
}
