//! Pattern store behaviour shared by the SQLite and in-memory adapters, plus
//! SQLite persistence across reopen.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use common::temp_dir;
use patchloop::adapters::memory::InMemoryPatternStore;
use patchloop::adapters::sqlite::open_pattern_store;
use patchloop::domain::models::{
    AntiPattern, AntiPatternScope, FixPattern, FixPatternKey, FixType, StrategyType,
};
use patchloop::domain::ports::PatternStore;

fn guard_fix(endpoint: &str) -> FixPattern {
    FixPattern {
        key: FixPatternKey::new("HTTPError", endpoint, None),
        strategy_type: StrategyType::ServiceLogic,
        fix_type: FixType::StockGuard,
        target_file: PathBuf::from("app/services/cart_service.py"),
        old_fragment: "        product = self.db.get(Product, product_id)".to_string(),
        new_fragment: "        product = self.db.get(Product, product_id)\n        # guard: stock_guard".to_string(),
        success_count: 1,
        failure_count: 0,
        updated_at: Utc::now(),
    }
}

/// The same sequence of calls against any store.
async fn exercise(store: Arc<dyn PatternStore>) {
    let fix = guard_fix("/carts/{id}/items");
    assert!(store.get_known_fix(&fix.key).await.unwrap().is_none());

    store.put_successful_fix(&fix).await.unwrap();
    store.put_successful_fix(&fix).await.unwrap();
    store.record_failed_fix(&fix.key).await.unwrap();
    let found = store.get_known_fix(&fix.key).await.unwrap().unwrap();
    assert_eq!((found.success_count, found.failure_count), (2, 1));
    assert!((found.success_rate() - 2.0 / 3.0).abs() < 1e-9);

    // Keys differing only by exception kind are distinct.
    let traced = FixPatternKey::new("HTTPError", "/carts/{id}/items", Some("AttributeError"));
    assert!(store.get_known_fix(&traced).await.unwrap().is_none());

    let scope = AntiPatternScope::Entity("Cart".to_string());
    let ap = AntiPattern::new(scope.clone(), "if cart.items:", "if not cart.items:", "inverted empty check");
    store.put_anti_pattern(&ap).await.unwrap();
    store.put_anti_pattern(&ap).await.unwrap();
    store.increment_prevented(ap.id).await.unwrap();
    let found = store.get_anti_patterns(&scope).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].prevented_count, 1);
    assert!(store
        .get_anti_patterns(&AntiPatternScope::ExceptionKind("Cart".to_string()))
        .await
        .unwrap()
        .is_empty());

    store.put_successful_fix(&guard_fix("/orders/{id}/items")).await.unwrap();
    assert_eq!(store.list_known_fixes(10).await.unwrap().len(), 2);
    assert_eq!(store.list_known_fixes(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sqlite_store_contract() {
    let dir = temp_dir();
    let store = open_pattern_store(&dir.path().join("patterns.db"), None).await.unwrap();
    exercise(Arc::new(store)).await;
}

#[tokio::test]
async fn memory_store_contract() {
    exercise(Arc::new(InMemoryPatternStore::new())).await;
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = temp_dir();
    let path = dir.path().join("nested").join("patterns.db");
    let fix = guard_fix("/carts/{id}/items");
    {
        let store = open_pattern_store(&path, None).await.unwrap();
        store.put_successful_fix(&fix).await.unwrap();
    }

    // Reopening re-runs migrations without touching stored rows.
    let store = open_pattern_store(&path, None).await.unwrap();
    let found = store.get_known_fix(&fix.key).await.unwrap().unwrap();
    assert_eq!(found.new_fragment, fix.new_fragment);
    assert_eq!(found.target_file, fix.target_file);
}
