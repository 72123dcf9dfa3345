use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use toolwarden::infra::distributed::RateWindow;
use toolwarden::infra::distributed_adapters::InMemoryRateLimitStore;
use toolwarden::infra::rate_limiter::RateLimiter;
use toolwarden_runtime::resolve_session;

proptest! {
    #[test]
    fn session_key_is_agent_then_user(user in "[a-z0-9@._-]{1,20}", agent in "[a-z0-9_-]{1,20}") {
        let key = resolve_session(&user, &agent).unwrap();
        prop_assert_eq!(key, format!("{}:{}", agent, user));
    }

    #[test]
    fn per_minute_windows_parse(limit in 1u32..10_000, plural in any::<bool>()) {
        let unit = if plural { "minutes" } else { "minute" };
        let window: RateWindow = format!("{} per {}", limit, unit).parse().unwrap();
        prop_assert_eq!(window, RateWindow::new(limit, Duration::from_secs(60)));
    }

    #[test]
    fn limiter_never_admits_past_limit(limit in 1u32..20, attempts in 1usize..60) {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            vec![RateWindow::new(limit, Duration::from_secs(60))],
        );
        let admitted = (0..attempts)
            .filter(|i| limiter.try_acquire_at("client", 1_000 + *i as u64).is_allowed())
            .count();
        prop_assert_eq!(admitted, attempts.min(limit as usize));
    }
}

#[test]
fn gateway_admission_counts_down() {
    use toolwarden::infra::lock_manager::LockManager;
    use toolwarden_runtime::{InMemorySessionStore, SessionGateway};

    let limiter = RateLimiter::parse(Arc::new(InMemoryRateLimitStore::new()), &["3/min"]).unwrap();
    let gateway = SessionGateway::new(
        Arc::new(limiter),
        LockManager::new(Duration::from_secs(1)),
        Arc::new(InMemorySessionStore::new()),
    );

    tokio_test::block_on(async {
        assert_eq!(tokio_test::assert_ok!(gateway.admit("c").await), 2);
        assert_eq!(tokio_test::assert_ok!(gateway.admit("c").await), 1);
        assert_eq!(tokio_test::assert_ok!(gateway.admit("c").await), 0);
        tokio_test::assert_err!(gateway.admit("c").await);
    });
}
