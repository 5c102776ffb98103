//! Per-entity wrappers returning the model structs.

use paste::paste;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{DeleteOutcome, ListFilter, Record};
use crate::entity::Entity;
use crate::error::LedgerResult;
use crate::model::{
    AffiliateEarning, AffiliatePlatform, CommunityPost, Company, FinancialGoal,
    FinancialTransaction, PostComment, PostReaction, RecurringExpense, Sale, Shipment, User,
};
use crate::state::LedgerContext;

fn decode<T: DeserializeOwned>(record: Record) -> LedgerResult<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

macro_rules! typed_repo {
    ( $( $model:ident => $prefix:ident ),+ $(,)? ) => {
        paste! {
            $(
                pub async fn [<$prefix _create>](
                    ctx: &LedgerContext,
                    payload: Map<String, Value>,
                ) -> LedgerResult<$model> {
                    decode(super::create(ctx, Entity::$model, payload).await?)
                }

                pub async fn [<$prefix _get>](ctx: &LedgerContext, id: &str) -> LedgerResult<$model> {
                    decode(super::read(ctx, Entity::$model, id).await?)
                }

                pub async fn [<$prefix _list>](
                    ctx: &LedgerContext,
                    filter: &ListFilter,
                ) -> LedgerResult<Vec<$model>> {
                    super::list(ctx, Entity::$model, filter)
                        .await?
                        .into_iter()
                        .map(decode)
                        .collect()
                }

                pub async fn [<$prefix _update>](
                    ctx: &LedgerContext,
                    id: &str,
                    patch: Map<String, Value>,
                ) -> LedgerResult<$model> {
                    decode(super::update(ctx, Entity::$model, id, patch).await?)
                }

                pub async fn [<$prefix _delete>](
                    ctx: &LedgerContext,
                    id: &str,
                ) -> LedgerResult<DeleteOutcome> {
                    super::delete(ctx, Entity::$model, id).await
                }
            )+
        }
    };
}

typed_repo!(
    User => user,
    Company => company,
    Sale => sale,
    Shipment => shipment,
    FinancialTransaction => financial_transaction,
    FinancialGoal => financial_goal,
    RecurringExpense => recurring_expense,
    AffiliatePlatform => affiliate_platform,
    AffiliateEarning => affiliate_earning,
    CommunityPost => community_post,
    PostReaction => post_reaction,
    PostComment => post_comment,
);
