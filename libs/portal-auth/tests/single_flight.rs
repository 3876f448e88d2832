#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Concurrency behaviour of `TokenStore::refresh_token`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use portal_auth::{
    ExchangeError, IdentityExchange, IssuedToken, Lifetime, RefreshPolicy, SecretString,
    TokenError, TokenStore,
};
use tokio::sync::Notify;

/// Exchange that blocks until released, counting how often it is entered.
#[derive(Debug)]
struct GatedExchange {
    calls: AtomicUsize,
    gate: Notify,
    fail: bool,
}

impl GatedExchange {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
            fail,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityExchange for GatedExchange {
    async fn exchange(&self) -> Result<IssuedToken, ExchangeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.notified().await;
        if self.fail {
            return Err(ExchangeError::Http("identity token HTTP 401 Unauthorized".into()));
        }
        Ok(IssuedToken {
            value: SecretString::new(format!("tok-{n}")),
            lifetime: Lifetime::ExpiresIn(Duration::from_secs(3600)),
        })
    }
}

/// Wait until the exchange has been entered `n` times.
async fn entered(exchange: &GatedExchange, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while exchange.calls() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("exchange was not entered");
}

/// Give attached waiters a chance to reach the shared future.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_share_one_exchange() {
    let exchange = GatedExchange::new(false);
    let store = TokenStore::new(exchange.clone(), RefreshPolicy::default());

    let waiters: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.refresh_token().await })
        })
        .collect();

    entered(&exchange, 1).await;
    settle().await;
    exchange.gate.notify_one();

    let mut values = Vec::new();
    for waiter in waiters {
        let token = waiter.await.unwrap().unwrap();
        values.push(token.value().expose().to_owned());
    }

    assert_eq!(exchange.calls(), 1);
    assert!(values.iter().all(|v| v == "tok-1"), "{values:?}");
    assert_eq!(store.current().unwrap().value().expose(), "tok-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_waiters_see_identical_error() {
    let exchange = GatedExchange::new(true);
    let store = TokenStore::new(exchange.clone(), RefreshPolicy::default());

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.refresh_token().await })
        })
        .collect();

    entered(&exchange, 1).await;
    settle().await;
    exchange.gate.notify_one();

    let mut errors = Vec::new();
    for waiter in waiters {
        errors.push(waiter.await.unwrap().unwrap_err());
    }

    assert_eq!(exchange.calls(), 1);
    assert!(matches!(errors[0], TokenError::RefreshFailed(_)));
    assert!(errors.iter().all(|e| *e == errors[0]), "{errors:?}");
    assert!(store.current().is_none());
}

#[tokio::test]
async fn next_refresh_after_completion_starts_a_new_exchange() {
    let exchange = GatedExchange::new(false);
    let store = TokenStore::new(exchange.clone(), RefreshPolicy::default());

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.refresh_token().await }
    });
    entered(&exchange, 1).await;
    exchange.gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap().value().expose(), "tok-1");

    let second = tokio::spawn({
        let store = store.clone();
        async move { store.refresh_token().await }
    });
    entered(&exchange, 2).await;
    exchange.gate.notify_one();
    assert_eq!(second.await.unwrap().unwrap().value().expose(), "tok-2");
}

#[tokio::test]
async fn abandoned_waiter_does_not_cancel_refresh() {
    let exchange = GatedExchange::new(false);
    let store = TokenStore::new(exchange.clone(), RefreshPolicy::default());

    let abandoned = tokio::spawn({
        let store = store.clone();
        async move { store.refresh_token().await }
    });
    entered(&exchange, 1).await;
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());

    let survivor = tokio::spawn({
        let store = store.clone();
        async move { store.refresh_token().await }
    });
    settle().await;
    exchange.gate.notify_one();

    let token = survivor.await.unwrap().unwrap();
    assert_eq!(token.value().expose(), "tok-1");
    assert_eq!(exchange.calls(), 1);
    assert_eq!(store.current().unwrap(), token);
}

#[tokio::test]
async fn waiters_time_out_with_timeout_error() {
    let exchange = GatedExchange::new(false);
    let policy = RefreshPolicy {
        acquire_timeout: Duration::from_millis(100),
        ..RefreshPolicy::default()
    };
    let store = TokenStore::new(exchange.clone(), policy);

    let err = store.get_valid_token().await.unwrap_err();

    assert_eq!(err, TokenError::Timeout(Duration::from_millis(100)));
    assert!(store.current().is_none());

    // The exchange itself was bounded too, so the slot is free again.
    settle().await;
    let again = tokio::spawn({
        let store = store.clone();
        async move { store.refresh_token().await }
    });
    entered(&exchange, 2).await;
    exchange.gate.notify_one();
    assert_eq!(again.await.unwrap().unwrap().value().expose(), "tok-2");
}
