//! 🗝️ CredentialContext: the per-data-lake token cache that sits in front of every request.
//!
//! 🎬 COLD OPEN - INT. GATEWAY - EVERY REQUEST, FOREVER
//!
//! Every outbound request asks the same thing: "which endpoint, which token?" Asking the
//! provider every single time would be rude. Never asking again would be naive, because
//! tokens expire. So we do both, politely:
//!
//! - First contact with a data lake: call the provider with `force = true`, exactly once,
//!   even if fifty requests arrive at the same instant. Everyone else waits for that answer.
//! - Every later request: *try* to grab the refresh lock. Got it? Ask the provider with
//!   `force = false` and swap in the new token if one comes back. Didn't get it? Somebody
//!   else is already refreshing, so use the cached token and move on.
//!
//! ⚠️ The second rule means a request racing a rotation may go out with the previous token.
//! That is accepted; the refresh is best effort and never blocks the request path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

use super::{Credential, DataLakeCredential};
use crate::error::{QueryError, Result};

struct CachedCredential {
    endpoint: String,
    token: RwLock<String>,
    refresh_lock: Mutex<()>,
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

type CredentialSlot = Arc<OnceCell<CachedCredential>>;

/// 📦 Per-data-lake endpoint/token cache with single-flight first resolution.
#[derive(Debug, Default)]
pub struct CredentialContext {
    default_credential: Option<DataLakeCredential>,
    slots: Mutex<HashMap<String, CredentialSlot>>,
}

impl CredentialContext {
    pub fn new(default_credential: Option<DataLakeCredential>) -> Self {
        Self {
            default_credential,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_credential(&self) -> Option<&DataLakeCredential> {
        self.default_credential.as_ref()
    }

    /// 🎯 Endpoint and current token for `credential`, or for the default one if `None`.
    ///
    /// 💀 `Configuration` when there is no credential to use at all, or when the provider
    /// has nothing to say on first contact. A failed first contact is not cached, so the
    /// next request tries again.
    pub async fn resolve(&self, credential: Option<&DataLakeCredential>) -> Result<Credential> {
        let lake = self.pick(credential)?;
        let slot = self.slot(&lake.data_lake_id).await;

        let mut first_contact = false;
        let first_contact_flag = &mut first_contact;
        let provider = lake.provider.clone();
        let data_lake_id = lake.data_lake_id.as_str();
        let cached = slot
            .get_or_try_init(|| async move {
                *first_contact_flag = true;
                debug!("🔑 First contact with data lake {data_lake_id}, forcing credential");
                let credential = provider.provide(true).await.ok_or_else(|| {
                    QueryError::Configuration(format!(
                        "credential provider returned nothing for data lake {data_lake_id}"
                    ))
                })?;
                Ok::<_, QueryError>(CachedCredential {
                    endpoint: credential.endpoint,
                    token: RwLock::new(credential.token),
                    refresh_lock: Mutex::new(()),
                })
            })
            .await?;

        if !first_contact {
            try_refresh(lake, cached).await;
        }

        let token = cached.token.read().await.clone();
        Ok(Credential {
            endpoint: cached.endpoint.clone(),
            token,
        })
    }

    /// 🔄 Ask the provider for a newer token (`force = false`) without waiting on anyone.
    ///
    /// `Ok(true)` when the cached token was replaced. `Ok(false)` when the provider had
    /// nothing new, another refresh was already running, or the data lake was never resolved.
    pub async fn refresh(&self, credential: Option<&DataLakeCredential>) -> Result<bool> {
        let lake = self.pick(credential)?;
        let slot = self.slot(&lake.data_lake_id).await;
        Ok(match slot.get() {
            Some(cached) => try_refresh(lake, cached).await,
            None => false,
        })
    }

    fn pick<'a>(&'a self, credential: Option<&'a DataLakeCredential>) -> Result<&'a DataLakeCredential> {
        credential
            .or(self.default_credential.as_ref())
            .ok_or_else(|| {
                QueryError::Configuration(
                    "no credential on the request and no default credential configured".into(),
                )
            })
    }

    async fn slot(&self, data_lake_id: &str) -> CredentialSlot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(data_lake_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

/// 🔒 One refresher at a time; everyone else keeps the cached token.
async fn try_refresh(lake: &DataLakeCredential, cached: &CachedCredential) -> bool {
    let Ok(_refreshing) = cached.refresh_lock.try_lock() else {
        return false;
    };
    let Some(update) = lake.provider.provide(false).await else {
        return false;
    };
    *cached.token.write().await = update.token;
    info!(
        "🔑 Updated authentication header for data lake {}",
        lake.data_lake_id
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 🧪 Counts forced and non-forced calls; hands out a new token on every refresh.
    #[derive(Debug, Default)]
    struct RotatingProvider {
        forced: AtomicUsize,
        refreshes: AtomicUsize,
        first_contact_delay_ms: u64,
    }

    #[async_trait]
    impl CredentialProvider for RotatingProvider {
        async fn provide(&self, force: bool) -> Option<Credential> {
            if force {
                self.forced.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(self.first_contact_delay_ms)).await;
                return Some(Credential::new("api.example", "token-0"));
            }
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Some(Credential::new("api.example", format!("token-{n}")))
        }
    }

    #[tokio::test]
    async fn the_one_where_first_contact_forces_and_later_calls_refresh() {
        let provider = Arc::new(RotatingProvider::default());
        let lake = DataLakeCredential::new("lake-1", provider.clone());
        let context = CredentialContext::new(Some(lake));

        let first = context.resolve(None).await.expect("resolves");
        assert_eq!(first.token, "token-0");
        assert_eq!(provider.forced.load(Ordering::SeqCst), 1);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);

        let second = context.resolve(None).await.expect("resolves");
        assert_eq!(second.token, "token-1");
        assert_eq!(second.endpoint, "api.example");
        assert_eq!(provider.forced.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_one_where_fifty_requests_share_one_first_contact() {
        let provider = Arc::new(RotatingProvider {
            first_contact_delay_ms: 20,
            ..RotatingProvider::default()
        });
        let lake = DataLakeCredential::new("lake-1", provider.clone());
        let context = Arc::new(CredentialContext::new(Some(lake)));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let context = context.clone();
            handles.push(tokio::spawn(async move { context.resolve(None).await }));
        }
        for handle in handles {
            let credential = handle.await.expect("task").expect("resolves");
            assert!(credential.token.starts_with("token-"));
        }
        assert_eq!(provider.forced.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_one_where_refresh_waits_for_first_contact() {
        let provider = Arc::new(RotatingProvider::default());
        let context = CredentialContext::new(Some(DataLakeCredential::new("lake-1", provider.clone())));

        assert!(!context.refresh(None).await.expect("no slot yet"));
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);

        context.resolve(None).await.expect("resolves");
        assert!(context.refresh(None).await.expect("refreshes"));
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(provider.forced.load(Ordering::SeqCst), 1);
    }

    /// 🧪 Writes down every token it hands out and how many calls overlap.
    #[derive(Debug, Default)]
    struct LedgerProvider {
        handed_out: std::sync::Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        issued: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for LedgerProvider {
        async fn provide(&self, _force: bool) -> Option<Credential> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            let token = format!("token-{}", self.issued.fetch_add(1, Ordering::SeqCst));
            self.handed_out
                .lock()
                .expect("ledger lock")
                .push(token.clone());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Some(Credential::new("api.example", token))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_a_refresh_stampede_only_ever_sees_real_tokens() {
        let provider = Arc::new(LedgerProvider::default());
        let context = Arc::new(CredentialContext::new(Some(DataLakeCredential::new(
            "lake-1",
            provider.clone(),
        ))));

        let mut handles = Vec::new();
        for i in 0..64 {
            let context = context.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    Some(context.resolve(None).await.expect("resolves").token)
                } else {
                    context.refresh(None).await.expect("refresh never fails here");
                    None
                }
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.extend(handle.await.expect("task"));
        }
        let last = context.resolve(None).await.expect("resolves").token;

        let handed_out = provider.handed_out.lock().expect("ledger lock").clone();
        assert!(seen.iter().all(|token| handed_out.contains(token)));
        assert!(handed_out.contains(&last));
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_one_where_nobody_brought_a_credential() {
        let context = CredentialContext::new(None);
        assert!(matches!(
            context.resolve(None).await,
            Err(QueryError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn the_one_where_a_silent_provider_is_retried_next_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lake = DataLakeCredential::from_fn("lake-2", move |_force| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            (n > 0).then(|| Credential::new("api.example", "late-token"))
        });
        let context = CredentialContext::new(None);

        assert!(matches!(
            context.resolve(Some(&lake)).await,
            Err(QueryError::Configuration(_))
        ));
        let credential = context.resolve(Some(&lake)).await.expect("second try works");
        assert_eq!(credential.token, "late-token");
    }

    #[tokio::test]
    async fn the_one_where_each_data_lake_gets_its_own_slot() {
        let a = DataLakeCredential::from_fn("a", |_| Some(Credential::new("a.example", "ta")));
        let b = DataLakeCredential::from_fn("b", |_| Some(Credential::new("b.example", "tb")));
        let context = CredentialContext::new(Some(a));
        assert_eq!(context.resolve(None).await.expect("a").endpoint, "a.example");
        assert_eq!(context.resolve(Some(&b)).await.expect("b").endpoint, "b.example");
    }
}
