use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Referent, WeakRef};

pub const ROLES: &[&str] = &["USER", "ADMIN"];
pub const SHIPMENT_STATUSES: &[&str] = &["PENDING", "LABEL_GENERATED", "SHIPPED", "DELIVERED"];
pub const TRANSACTION_TYPES: &[&str] = &["INCOME", "EXPENSE"];
pub const TRANSACTION_STATUSES: &[&str] = &["PENDING", "PAID", "CANCELLED"];
pub const EARNING_STATUSES: &[&str] = &["PENDING", "CONFIRMED", "PAID"];
pub const REACTION_TYPES: &[&str] = &["LIKE", "HYPE"];
pub const RELATED_TYPES: &[&str] = &[
    "SALE",
    "SHIPMENT",
    "AFFILIATE_EARNING",
    "RECURRING_EXPENSE",
    "OTHER",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Pending,
    LabelGenerated,
    Shipped,
    Delivered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReactionType {
    Like,
    Hype,
}

impl ReactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionType::Like => "LIKE",
            ReactionType::Hype => "HYPE",
        }
    }
}

/// Target of a transaction's polymorphic `related_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelatedType {
    Sale,
    Shipment,
    AffiliateEarning,
    RecurringExpense,
    Other,
}

impl RelatedType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SALE" => Some(RelatedType::Sale),
            "SHIPMENT" => Some(RelatedType::Shipment),
            "AFFILIATE_EARNING" => Some(RelatedType::AffiliateEarning),
            "RECURRING_EXPENSE" => Some(RelatedType::RecurringExpense),
            "OTHER" => Some(RelatedType::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelatedType::Sale => "SALE",
            RelatedType::Shipment => "SHIPMENT",
            RelatedType::AffiliateEarning => "AFFILIATE_EARNING",
            RelatedType::RecurringExpense => "RECURRING_EXPENSE",
            RelatedType::Other => "OTHER",
        }
    }

    /// Entity the reference must resolve to; `Other` is never checked.
    pub fn entity(self) -> Option<Entity> {
        match self {
            RelatedType::Sale => Some(Entity::Sale),
            RelatedType::Shipment => Some(Entity::Shipment),
            RelatedType::AffiliateEarning => Some(Entity::AffiliateEarning),
            RelatedType::RecurringExpense => Some(Entity::RecurringExpense),
            RelatedType::Other => None,
        }
    }

    pub fn for_entity(entity: Entity) -> Option<Self> {
        [
            RelatedType::Sale,
            RelatedType::Shipment,
            RelatedType::AffiliateEarning,
            RelatedType::RecurringExpense,
        ]
        .into_iter()
        .find(|kind| kind.entity() == Some(entity))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub plan: String,
    pub role: Role,
    pub is_active: bool,
    pub is_public_profile: bool,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub document: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub user_id: String,
    pub customer_name: String,
    #[serde(default)]
    pub customer_cpf: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    pub sale_price: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: String,
    pub user_id: String,
    pub recipient_name: String,
    #[serde(default)]
    pub content_description: Option<String>,
    #[serde(default)]
    pub tracking_code: Option<String>,
    pub status: ShipmentStatus,
    pub label_generated: bool,
    pub declaration_generated: bool,
    #[serde(default)]
    pub sale_id: Option<WeakRef<Sale>>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialTransaction {
    pub id: String,
    pub user_id: String,
    pub description: String,
    pub date: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(default)]
    pub category: Option<String>,
    pub status: String,
    #[serde(default)]
    pub related_id: Option<String>,
    #[serde(default)]
    pub related_type: Option<RelatedType>,
    pub created_at: String,
    pub updated_at: String,
}

impl FinancialTransaction {
    /// The related sale, when the polymorphic reference points at one.
    pub fn related_sale(&self) -> Option<WeakRef<Sale>> {
        match (self.related_type, &self.related_id) {
            (Some(RelatedType::Sale), Some(id)) => Some(WeakRef::new(id.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialGoal {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub target_amount: f64,
    pub current_amount: f64,
    #[serde(default)]
    pub deadline: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringExpense {
    pub id: String,
    pub user_id: String,
    pub description: String,
    pub amount: f64,
    #[serde(default)]
    pub category: Option<String>,
    pub day_of_month: i64,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliatePlatform {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub commission_rate: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateEarning {
    pub id: String,
    pub user_id: String,
    pub platform_id: WeakRef<AffiliatePlatform>,
    pub amount: f64,
    pub date: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityPost {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub likes_count: i64,
    pub hypes_count: i64,
    pub comments_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReaction {
    pub id: String,
    pub post_id: WeakRef<CommunityPost>,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: ReactionType,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostComment {
    pub id: String,
    pub post_id: WeakRef<CommunityPost>,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

macro_rules! referents {
    ( $( $model:ident ),+ $(,)? ) => {
        $(
            impl Referent for $model {
                const ENTITY: Entity = Entity::$model;
            }
        )+
    };
}

referents!(
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
);
