use anyhow::Result;
use bizledger_lib::ledger::{recount_posts, run_audit};
use bizledger_lib::repo;
use bizledger_lib::Entity;
use serde_json::json;

mod util;
use util::{id_of, payload, seed_user};

#[tokio::test]
async fn counters_follow_child_writes_and_deletes() -> Result<()> {
    let ctx = util::ledger().await;
    let author = seed_user(&ctx, "author@example.com").await;
    let fan = seed_user(&ctx, "fan@example.com").await;
    let post = repo::community_post_create(
        &ctx,
        payload(json!({ "user_id": author, "content": "new stock" })),
    )
    .await?;

    let like = repo::create(
        &ctx,
        Entity::PostReaction,
        payload(json!({ "user_id": fan, "post_id": post.id, "type": "LIKE" })),
    )
    .await?;
    let comment = repo::create(
        &ctx,
        Entity::PostComment,
        payload(json!({ "user_id": fan, "post_id": post.id, "content": "nice" })),
    )
    .await?;

    let stored = repo::community_post_get(&ctx, &post.id).await?;
    assert_eq!(
        (stored.likes_count, stored.hypes_count, stored.comments_count),
        (1, 0, 1)
    );

    repo::update(&ctx, Entity::PostReaction, &id_of(&like), payload(json!({ "type": "HYPE" }))).await?;
    let stored = repo::community_post_get(&ctx, &post.id).await?;
    assert_eq!((stored.likes_count, stored.hypes_count), (0, 1));

    repo::delete(&ctx, Entity::PostComment, &id_of(&comment)).await?;
    let stored = repo::community_post_get(&ctx, &post.id).await?;
    assert_eq!(stored.comments_count, 0);

    let err = repo::create(
        &ctx,
        Entity::PostReaction,
        payload(json!({ "user_id": fan, "post_id": post.id, "type": "HYPE" })),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("already recorded"));
    Ok(())
}

#[tokio::test]
async fn deleting_a_post_removes_its_children() -> Result<()> {
    let ctx = util::ledger().await;
    let author = seed_user(&ctx, "author@example.com").await;
    let fan = seed_user(&ctx, "fan@example.com").await;
    let post = repo::create(
        &ctx,
        Entity::CommunityPost,
        payload(json!({ "user_id": author, "content": "bye" })),
    )
    .await?;
    let post_id = id_of(&post);
    repo::create(
        &ctx,
        Entity::PostReaction,
        payload(json!({ "user_id": fan, "post_id": post_id, "type": "LIKE" })),
    )
    .await?;
    repo::create(
        &ctx,
        Entity::PostComment,
        payload(json!({ "user_id": fan, "post_id": post_id, "content": "why" })),
    )
    .await?;

    match repo::delete(&ctx, Entity::CommunityPost, &post_id).await? {
        repo::DeleteOutcome::Row { effects, .. } => assert_eq!(effects.removed, 2),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(util::count(ctx.pool(), "post_reactions").await, 0);
    assert_eq!(util::count(ctx.pool(), "post_comments").await, 0);
    Ok(())
}

#[tokio::test]
async fn drifted_counters_are_audited_and_recounted() -> Result<()> {
    let ctx = util::ledger().await;
    let author = seed_user(&ctx, "author@example.com").await;
    let post = repo::create(
        &ctx,
        Entity::CommunityPost,
        payload(json!({ "user_id": author, "content": "viral" })),
    )
    .await?;
    sqlx::query("UPDATE community_posts SET likes_count = 42 WHERE id = ?1")
        .bind(id_of(&post))
        .execute(ctx.pool())
        .await?;

    let audit = run_audit(ctx.pool()).await?;
    assert!(!audit.is_ok());
    let check = audit.checks.iter().find(|c| c.name == "post_counters").unwrap();
    assert!(!check.passed);

    assert_eq!(recount_posts(ctx.pool()).await?, 1);
    assert!(run_audit(ctx.pool()).await?.is_ok());
    assert_eq!(recount_posts(ctx.pool()).await?, 0);
    Ok(())
}
