mod common;

use common::TestApp;
use futures::future::join_all;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use stocktrack_api::entities::stock_movement;
use stocktrack_api::errors::ServiceError;

#[tokio::test]
async fn concurrent_decreases_settle_exactly() {
    let app = TestApp::new().await;
    let item = app.seed_item("CON-CUR-001", "Contended widget", 50).await;

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let ledger = app.state.ledger.clone();
            let item_id = item.id;
            let actor_id = app.user_id;
            tokio::spawn(async move { ledger.decrease(item_id, 5, actor_id, None).await })
        })
        .collect();

    let results = join_all(tasks).await;
    for result in results {
        result.expect("task").expect("decrease");
    }

    let fresh = app.state.items.get_item(item.id).await.expect("item");
    assert_eq!(fresh.quantity, 25);

    let entries = stock_movement::Entity::find()
        .filter(stock_movement::Column::ItemId.eq(item.id))
        .count(app.state.db.as_ref())
        .await
        .expect("count");
    assert_eq!(entries, 5);
}

#[tokio::test]
async fn oversubscribed_decreases_never_go_negative() {
    let app = TestApp::new().await;
    // 10 units, 20 callers wanting 3 each: at most 3 can succeed
    let item = app.seed_item("CON-CUR-002", "Scarce widget", 10).await;

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let ledger = app.state.ledger.clone();
            let item_id = item.id;
            let actor_id = app.user_id;
            tokio::spawn(async move { ledger.decrease(item_id, 3, actor_id, None).await })
        })
        .collect();

    let results = join_all(tasks).await;
    let mut successes = 0;
    for result in results {
        match result.expect("task") {
            Ok(_) => successes += 1,
            Err(ServiceError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 3);

    let fresh = app.state.items.get_item(item.id).await.expect("item");
    assert_eq!(fresh.quantity, 10 - 3 * successes);
    assert!(fresh.quantity >= 0);

    let entries = stock_movement::Entity::find()
        .filter(stock_movement::Column::ItemId.eq(item.id))
        .count(app.state.db.as_ref())
        .await
        .expect("count");
    assert_eq!(entries, successes as u64);
}

#[tokio::test]
async fn mixed_concurrent_movements_preserve_sum_invariant() {
    let app = TestApp::new().await;
    let item = app.seed_item("CON-CUR-003", "Busy widget", 100).await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let ledger = app.state.ledger.clone();
        let item_id = item.id;
        let actor_id = app.user_id;
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger.increase(item_id, 7, actor_id, None).await
            } else {
                ledger.decrease(item_id, 4, actor_id, None).await
            }
        }));
    }

    for result in join_all(tasks).await {
        result.expect("task").expect("movement");
    }

    let fresh = app.state.items.get_item(item.id).await.expect("item");
    assert_eq!(fresh.quantity, 100 + 5 * 7 - 5 * 4);

    let entries = stock_movement::Entity::find()
        .filter(stock_movement::Column::ItemId.eq(item.id))
        .all(app.state.db.as_ref())
        .await
        .expect("entries");
    let signed: i32 = entries.iter().map(|e| e.signed_amount()).sum();
    assert_eq!(fresh.quantity, fresh.baseline_quantity + signed);
}
