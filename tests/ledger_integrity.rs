use anyhow::Result;
use bizledger_lib::ledger::integrity;
use bizledger_lib::repo::{self, DeleteOutcome, ListFilter};
use bizledger_lib::{Entity, LedgerError};
use serde_json::json;

mod util;
use util::{id_of, payload, seed_user};

fn integrity_code(err: &LedgerError) -> Option<&'static str> {
    match err {
        LedgerError::Integrity { code, .. } => Some(code),
        _ => None,
    }
}

#[tokio::test]
async fn shipment_must_reference_a_sale_of_the_same_owner() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;
    let u2 = seed_user(&ctx, "u2@example.com").await;

    let sale = repo::create(
        &ctx,
        Entity::Sale,
        payload(json!({ "userId": u1, "customerName": "Ana", "salePrice": 120.0 })),
    )
    .await?;
    let sale_id = id_of(&sale);

    let shipment = repo::create(
        &ctx,
        Entity::Shipment,
        payload(json!({ "user_id": u1, "recipient_name": "Ana", "sale_id": sale_id })),
    )
    .await?;
    assert_eq!(shipment["sale_id"], json!(sale_id));

    let err = repo::create(
        &ctx,
        Entity::Shipment,
        payload(json!({ "user_id": u2, "recipient_name": "Bia", "sale_id": sale_id })),
    )
    .await
    .unwrap_err();
    assert_eq!(integrity_code(&err), Some(integrity::REFERENCE_INVALID));
    assert_eq!(util::count(ctx.pool(), "shipments").await, 1);
    Ok(())
}

#[tokio::test]
async fn dangling_references_are_rejected() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;

    let err = repo::create(
        &ctx,
        Entity::Shipment,
        payload(json!({ "user_id": u1, "recipient_name": "Ana", "sale_id": "missing" })),
    )
    .await
    .unwrap_err();
    assert_eq!(integrity_code(&err), Some(integrity::REFERENCE_INVALID));

    let err = repo::create(
        &ctx,
        Entity::FinancialTransaction,
        payload(json!({
            "user_id": u1,
            "description": "Sale income",
            "date": "2025-03-01T00:00:00Z",
            "amount": 50,
            "type": "INCOME",
            "related_id": "missing",
            "related_type": "SALE",
        })),
    )
    .await
    .unwrap_err();
    assert_eq!(integrity_code(&err), Some(integrity::REFERENCE_INVALID));

    // OTHER is free-form and never resolved.
    repo::create(
        &ctx,
        Entity::FinancialTransaction,
        payload(json!({
            "user_id": u1,
            "description": "Refund",
            "date": "2025-03-02",
            "amount": 5,
            "type": "EXPENSE",
            "related_id": "external-42",
            "related_type": "OTHER",
        })),
    )
    .await?;
    Ok(())
}

#[tokio::test]
async fn a_sale_ships_at_most_once() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;
    let sale = repo::create(
        &ctx,
        Entity::Sale,
        payload(json!({ "user_id": u1, "customer_name": "Ana", "sale_price": 10 })),
    )
    .await?;
    let sale_id = id_of(&sale);

    let ship = json!({ "user_id": u1, "recipient_name": "Ana", "sale_id": sale_id });
    repo::create(&ctx, Entity::Shipment, payload(ship.clone())).await?;
    let err = repo::create(&ctx, Entity::Shipment, payload(ship))
        .await
        .unwrap_err();
    assert_eq!(integrity_code(&err), Some(integrity::SALE_ALREADY_SHIPPED));
    Ok(())
}

#[tokio::test]
async fn update_revalidates_the_merged_row() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;
    let u2 = seed_user(&ctx, "u2@example.com").await;
    let foreign_sale = repo::create(
        &ctx,
        Entity::Sale,
        payload(json!({ "user_id": u2, "customer_name": "Bia", "sale_price": 10 })),
    )
    .await?;
    let shipment = repo::create(
        &ctx,
        Entity::Shipment,
        payload(json!({ "user_id": u1, "recipient_name": "Ana" })),
    )
    .await?;

    let err = repo::update(
        &ctx,
        Entity::Shipment,
        &id_of(&shipment),
        payload(json!({ "sale_id": id_of(&foreign_sale) })),
    )
    .await
    .unwrap_err();
    assert_eq!(integrity_code(&err), Some(integrity::REFERENCE_INVALID));

    let stored = repo::read(&ctx, Entity::Shipment, &id_of(&shipment)).await?;
    assert_eq!(stored["sale_id"], json!(null));
    Ok(())
}

#[tokio::test]
async fn update_preserves_untouched_fields_and_bumps_updated_at() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;
    let sale = repo::create(
        &ctx,
        Entity::Sale,
        payload(json!({ "user_id": u1, "customer_name": "Ana", "sale_price": 10, "product_id": "p1" })),
    )
    .await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let updated = repo::update(
        &ctx,
        Entity::Sale,
        &id_of(&sale),
        payload(json!({ "sale_price": 12.5, "created_at": "1999-01-01T00:00:00Z" })),
    )
    .await?;
    assert_eq!(updated["product_id"], json!("p1"));
    assert_eq!(updated["sale_price"], json!(12.5));
    assert_eq!(updated["created_at"], sale["created_at"]);
    assert_ne!(updated["updated_at"], sale["updated_at"]);

    let err = repo::update(
        &ctx,
        Entity::Sale,
        &id_of(&sale),
        payload(json!({ "id": "other" })),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LedgerError::Validation { .. }));
    Ok(())
}

#[tokio::test]
async fn owner_of_a_referenced_sale_cannot_change() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;
    let u2 = seed_user(&ctx, "u2@example.com").await;
    let sale = repo::create(
        &ctx,
        Entity::Sale,
        payload(json!({ "user_id": u1, "customer_name": "Ana", "sale_price": 10 })),
    )
    .await?;
    repo::create(
        &ctx,
        Entity::Shipment,
        payload(json!({ "user_id": u1, "recipient_name": "Ana", "sale_id": id_of(&sale) })),
    )
    .await?;

    let err = repo::update(&ctx, Entity::Sale, &id_of(&sale), payload(json!({ "user_id": u2 })))
        .await
        .unwrap_err();
    assert_eq!(integrity_code(&err), Some(integrity::OWNER_CHANGE_BLOCKED));
    Ok(())
}

#[tokio::test]
async fn deleting_a_sale_detaches_its_references() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;
    let sale = repo::create(
        &ctx,
        Entity::Sale,
        payload(json!({ "user_id": u1, "customer_name": "Ana", "sale_price": 10 })),
    )
    .await?;
    let sale_id = id_of(&sale);
    let shipment = repo::create(
        &ctx,
        Entity::Shipment,
        payload(json!({ "user_id": u1, "recipient_name": "Ana", "sale_id": sale_id })),
    )
    .await?;
    let tx = repo::create(
        &ctx,
        Entity::FinancialTransaction,
        payload(json!({
            "user_id": u1,
            "description": "Sale income",
            "date": "2025-03-01T00:00:00Z",
            "amount": 10,
            "type": "INCOME",
            "related_id": sale_id,
            "related_type": "SALE",
        })),
    )
    .await?;

    let outcome = repo::delete(&ctx, Entity::Sale, &sale_id).await?;
    match outcome {
        DeleteOutcome::Row { effects, .. } => {
            assert_eq!(effects.detached, 2);
            assert_eq!(effects.removed, 0);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let shipment = repo::read(&ctx, Entity::Shipment, &id_of(&shipment)).await?;
    assert_eq!(shipment["sale_id"], json!(null));
    let tx = repo::read(&ctx, Entity::FinancialTransaction, &id_of(&tx)).await?;
    assert_eq!(tx["related_id"], json!(null));
    assert_eq!(tx["related_type"], json!(null));

    let err = repo::read(&ctx, Entity::Sale, &sale_id).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn deleting_a_platform_removes_its_earnings() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;
    let platform = repo::create(
        &ctx,
        Entity::AffiliatePlatform,
        payload(json!({ "user_id": u1, "name": "Shop", "commission_rate": 7.5 })),
    )
    .await?;
    for amount in [10, 20] {
        repo::create(
            &ctx,
            Entity::AffiliateEarning,
            payload(json!({
                "user_id": u1,
                "platform_id": id_of(&platform),
                "amount": amount,
                "date": "2025-02-01",
            })),
        )
        .await?;
    }

    repo::delete(&ctx, Entity::AffiliatePlatform, &id_of(&platform)).await?;
    assert_eq!(util::count(ctx.pool(), "affiliate_earnings").await, 0);
    Ok(())
}

#[tokio::test]
async fn create_reports_every_invalid_field() -> Result<()> {
    let ctx = util::ledger().await;
    let err = repo::create(
        &ctx,
        Entity::Sale,
        payload(json!({ "sale_price": "lots", "bogus": 1 })),
    )
    .await
    .unwrap_err();
    let LedgerError::Validation { issues, .. } = err else {
        panic!("expected validation error");
    };
    assert!(issues.iter().any(|i| i.contains("bogus")));
    assert!(issues.iter().any(|i| i.contains("sale_price")));
    Ok(())
}

#[tokio::test]
async fn list_filters_and_pages() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;
    for name in ["Ana", "Bia", "Caio"] {
        repo::create(
            &ctx,
            Entity::Sale,
            payload(json!({ "user_id": u1, "customer_name": name, "sale_price": 1 })),
        )
        .await?;
    }

    let rows = repo::list(
        &ctx,
        Entity::Sale,
        &ListFilter::new()
            .eq("userId", u1.as_str())
            .order_by("customer_name", true)
            .page(Some(2), None),
    )
    .await?;
    let names: Vec<_> = rows.iter().map(|r| r["customer_name"].clone()).collect();
    assert_eq!(names, vec![json!("Caio"), json!("Bia")]);

    let none = repo::list(&ctx, Entity::Sale, &ListFilter::new().eq("user_id", "nobody")).await?;
    assert!(none.is_empty());

    let typed = repo::sale_list(&ctx, &ListFilter::new().eq("customer_name", "Ana")).await?;
    assert_eq!(typed.len(), 1);
    assert_eq!(typed[0].customer_name, "Ana");
    Ok(())
}

#[tokio::test]
async fn timestamps_are_stored_as_utc_millis() -> Result<()> {
    let ctx = util::ledger().await;
    let u1 = seed_user(&ctx, "u1@example.com").await;

    let offset = repo::create(
        &ctx,
        Entity::FinancialTransaction,
        payload(json!({
            "user_id": u1,
            "description": "Packaging",
            "date": "2025-03-01T02:00:00+02:00",
            "amount": 30,
            "type": "EXPENSE",
        })),
    )
    .await?;
    let calendar = repo::create(
        &ctx,
        Entity::FinancialTransaction,
        payload(json!({
            "user_id": u1,
            "description": "Postage",
            "date": "2025-03-01",
            "amount": 4,
            "type": "EXPENSE",
        })),
    )
    .await?;
    for row in [&offset, &calendar] {
        let stored = repo::read(&ctx, Entity::FinancialTransaction, &id_of(row)).await?;
        assert_eq!(stored["date"], json!("2025-03-01T00:00:00.000Z"));
    }

    let goal = repo::create(
        &ctx,
        Entity::FinancialGoal,
        payload(json!({ "user_id": u1, "name": "Van", "target_amount": 9000, "deadline": "2026-01-31" })),
    )
    .await?;
    assert_eq!(goal["deadline"], json!("2026-01-31T00:00:00.000Z"));

    repo::update(
        &ctx,
        Entity::FinancialGoal,
        &id_of(&goal),
        payload(json!({ "deadline": "2026-02-01T09:30:00-03:00" })),
    )
    .await?;
    let stored = repo::read(&ctx, Entity::FinancialGoal, &id_of(&goal)).await?;
    assert_eq!(stored["deadline"], json!("2026-02-01T12:30:00.000Z"));
    Ok(())
}
