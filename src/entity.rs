use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::schema::{self, Column};

/// Every table the ledger owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    User,
    Company,
    Sale,
    Shipment,
    FinancialTransaction,
    FinancialGoal,
    RecurringExpense,
    AffiliatePlatform,
    AffiliateEarning,
    CommunityPost,
    PostReaction,
    PostComment,
}

impl Entity {
    pub const ALL: [Entity; 12] = [
        Entity::User,
        Entity::Company,
        Entity::Sale,
        Entity::Shipment,
        Entity::FinancialTransaction,
        Entity::FinancialGoal,
        Entity::RecurringExpense,
        Entity::AffiliatePlatform,
        Entity::AffiliateEarning,
        Entity::CommunityPost,
        Entity::PostReaction,
        Entity::PostComment,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Entity::User => "users",
            Entity::Company => "companies",
            Entity::Sale => "sales",
            Entity::Shipment => "shipments",
            Entity::FinancialTransaction => "financial_transactions",
            Entity::FinancialGoal => "financial_goals",
            Entity::RecurringExpense => "recurring_expenses",
            Entity::AffiliatePlatform => "affiliate_platforms",
            Entity::AffiliateEarning => "affiliate_earnings",
            Entity::CommunityPost => "community_posts",
            Entity::PostReaction => "post_reactions",
            Entity::PostComment => "post_comments",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Entity::User => "User",
            Entity::Company => "Company",
            Entity::Sale => "Sale",
            Entity::Shipment => "Shipment",
            Entity::FinancialTransaction => "FinancialTransaction",
            Entity::FinancialGoal => "FinancialGoal",
            Entity::RecurringExpense => "RecurringExpense",
            Entity::AffiliatePlatform => "AffiliatePlatform",
            Entity::AffiliateEarning => "AffiliateEarning",
            Entity::CommunityPost => "CommunityPost",
            Entity::PostReaction => "PostReaction",
            Entity::PostComment => "PostComment",
        }
    }

    /// Column holding the id of the user a row belongs to.
    pub fn owner_column(self) -> &'static str {
        match self {
            Entity::User => "id",
            _ => "user_id",
        }
    }

    pub fn columns(self) -> &'static [Column] {
        schema::columns(self)
    }

    pub fn column(self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEntity(pub String);

impl fmt::Display for UnknownEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entity: {}", self.0)
    }
}

impl std::error::Error for UnknownEntity {}

impl FromStr for Entity {
    type Err = UnknownEntity;

    /// Accepts the entity name, its table name, or the snake_case variant
    /// (`FinancialTransaction`, `financial_transactions`, `financial_transaction`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim();
        Entity::ALL
            .into_iter()
            .find(|entity| {
                entity.name().eq_ignore_ascii_case(needle)
                    || entity.table().eq_ignore_ascii_case(needle)
                    || entity.table().trim_end_matches('s').eq_ignore_ascii_case(needle)
                    || entity.name().eq_ignore_ascii_case(&needle.replace('_', ""))
            })
            .ok_or_else(|| UnknownEntity(value.to_string()))
    }
}

/// Model types that can be the target of a [`WeakRef`].
pub trait Referent {
    const ENTITY: Entity;
}

/// A logical foreign key: the id of a row in `T`'s table. Storage does not
/// enforce it; the ledger validates it on write.
pub struct WeakRef<T> {
    id: String,
    _target: PhantomData<fn() -> T>,
}

impl<T> WeakRef<T> {
    pub fn new(id: impl Into<String>) -> Self {
        WeakRef {
            id: id.into(),
            _target: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T: Referent> WeakRef<T> {
    pub fn entity(&self) -> Entity {
        T::ENTITY
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        WeakRef::new(self.id.clone())
    }
}

impl<T> PartialEq for WeakRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for WeakRef<T> {}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakRef").field(&self.id).finish()
    }
}

impl<T> Serialize for WeakRef<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl<'de, T> Deserialize<'de> for WeakRef<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(WeakRef::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sale;

    #[test]
    fn parses_names_tables_and_snake_case() {
        assert_eq!("Sale".parse::<Entity>(), Ok(Entity::Sale));
        assert_eq!("sales".parse::<Entity>(), Ok(Entity::Sale));
        assert_eq!(
            "financial_transaction".parse::<Entity>(),
            Ok(Entity::FinancialTransaction)
        );
        assert_eq!(
            "financial_transactions".parse::<Entity>(),
            Ok(Entity::FinancialTransaction)
        );
        assert_eq!("companies".parse::<Entity>(), Ok(Entity::Company));
        assert!("invoices".parse::<Entity>().is_err());
    }

    #[test]
    fn owner_column_is_id_for_users() {
        assert_eq!(Entity::User.owner_column(), "id");
        assert_eq!(Entity::PostComment.owner_column(), "user_id");
    }

    #[test]
    fn weak_ref_serializes_as_plain_id() {
        let sale: WeakRef<Sale> = WeakRef::new("s1");
        assert_eq!(sale.entity(), Entity::Sale);
        assert_eq!(serde_json::to_value(&sale).unwrap(), serde_json::json!("s1"));
        let back: WeakRef<Sale> = serde_json::from_value(serde_json::json!("s1")).unwrap();
        assert_eq!(back, sale);
    }
}
