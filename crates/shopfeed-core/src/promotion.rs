//! # Promotion Translation
//!
//! Maps a host discount rule to a remote offer row.
//!
//! ## Supported Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  coupon type      no_coupon        → AUTOMATIC_AT_CHECKOUT, no code    │
//! │                   specific_coupon  → BUYER_APPLIED, code               │
//! │                   auto_generated   → ✗ unsupported                     │
//! │                                                                         │
//! │  action           free shipping (address) → 100% off SHIPPING          │
//! │                   by_percent       → PERCENTAGE, ORDER_LEVEL           │
//! │                   by_fixed         → FIXED_AMOUNT, ORDER_LEVEL         │
//! │                   free shipping (item), cart_fixed, buy_x_get_y → ✗    │
//! │                                                                         │
//! │  conditions       none             → no minimum                        │
//! │                   base_subtotal >= N → min_subtotal "N USD"            │
//! │                   anything else    → ✗ unsupported                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Offer ids are random per build unless the translator is created with
//! [`OfferIdPolicy::StableFromRule`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::{format_hundredths, Money};
use crate::types::StoreContext;

/// Fixed column order of the promotions feed file.
pub const PROMOTION_FIELDS: &[&str] = &[
    "offer_id",
    "title",
    "start_date_time",
    "end_date_time",
    "redeem_limit_per_user",
    "public_coupon_code",
    "application_type",
    "min_subtotal",
    "value_type",
    "fixed_amount_off",
    "percent_off",
    "target_granularity",
    "target_selection",
    "target_type",
    "target_shipping_option_types",
    "min_quantity",
    "target_quantity",
];

/// Namespace for offer ids derived from rule ids.
const OFFER_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_7a2e_93d1_4b8e_a4c6_1e2f_3b9d_8c71);

// =============================================================================
// Discount Rule
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponType {
    NoCoupon,
    SpecificCoupon,
    AutoGenerated,
}

impl CouponType {
    /// Maps the host's coupon type code; `None` for unknown codes.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "no_coupon" => Some(CouponType::NoCoupon),
            "specific_coupon" => Some(CouponType::SpecificCoupon),
            "auto_generated" => Some(CouponType::AutoGenerated),
            _ => None,
        }
    }

    pub const fn as_code(&self) -> &'static str {
        match self {
            CouponType::NoCoupon => "no_coupon",
            CouponType::SpecificCoupon => "specific_coupon",
            CouponType::AutoGenerated => "auto_generated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleAction {
    ByPercent,
    ByFixed,
    CartFixed,
    BuyXGetY,
    Other(String),
}

impl SimpleAction {
    /// Maps the host's `simple_action` column.
    pub fn from_code(code: &str) -> Self {
        match code {
            "by_percent" => SimpleAction::ByPercent,
            "by_fixed" => SimpleAction::ByFixed,
            "cart_fixed" => SimpleAction::CartFixed,
            "buy_x_get_y" => SimpleAction::BuyXGetY,
            other => SimpleAction::Other(other.to_string()),
        }
    }

    pub fn as_code(&self) -> &str {
        match self {
            SimpleAction::ByPercent => "by_percent",
            SimpleAction::ByFixed => "by_fixed",
            SimpleAction::CartFixed => "cart_fixed",
            SimpleAction::BuyXGetY => "buy_x_get_y",
            SimpleAction::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeShipping {
    #[default]
    None,
    ForMatchingItemsOnly,
    ForShipment,
}

impl FreeShipping {
    /// Maps the host's free shipping code; `None` for unknown codes.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "none" | "" => Some(FreeShipping::None),
            "for_matching_items_only" => Some(FreeShipping::ForMatchingItemsOnly),
            "for_shipment" => Some(FreeShipping::ForShipment),
            _ => None,
        }
    }

    pub const fn as_code(&self) -> &'static str {
        match self {
            FreeShipping::None => "none",
            FreeShipping::ForMatchingItemsOnly => "for_matching_items_only",
            FreeShipping::ForShipment => "for_shipment",
        }
    }
}

/// One top-level rule condition (`attribute operator value`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub attribute: String,
    pub operator: String,
    pub value: String,
}

/// A cart discount rule from the host platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountRule {
    pub rule_id: i64,
    pub name: String,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub uses_per_customer: u32,
    pub coupon_type: CouponType,
    pub coupon_code: Option<String>,
    pub simple_action: SimpleAction,
    /// Discount amount in hundredths (percent or currency).
    pub discount_amount: i64,
    pub free_shipping: FreeShipping,
    pub conditions: Vec<RuleCondition>,
}

// =============================================================================
// Offer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationType {
    BuyerApplied,
    AutomaticAtCheckout,
}

impl ApplicationType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ApplicationType::BuyerApplied => "BUYER_APPLIED",
            ApplicationType::AutomaticAtCheckout => "AUTOMATIC_AT_CHECKOUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Percentage,
    FixedAmount,
}

impl ValueType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValueType::Percentage => "PERCENTAGE",
            ValueType::FixedAmount => "FIXED_AMOUNT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetGranularity {
    OrderLevel,
    ItemLevel,
}

impl TargetGranularity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TargetGranularity::OrderLevel => "ORDER_LEVEL",
            TargetGranularity::ItemLevel => "ITEM_LEVEL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    LineItem,
    Shipping,
}

impl TargetType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TargetType::LineItem => "LINE_ITEM",
            TargetType::Shipping => "SHIPPING",
        }
    }
}

/// A remote offer row. Ephemeral: built, written, dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub offer_id: String,
    pub title: String,
    pub start_date_time: String,
    pub end_date_time: String,
    pub redeem_limit_per_user: u32,
    pub public_coupon_code: String,
    pub application_type: ApplicationType,
    /// Empty when the rule has no minimum.
    pub min_subtotal: String,
    pub value_type: ValueType,
    pub fixed_amount_off: String,
    pub percent_off: String,
    pub target_granularity: TargetGranularity,
    pub target_selection: &'static str,
    pub target_type: TargetType,
    pub target_shipping_option_types: String,
    pub min_quantity: String,
    pub target_quantity: String,
}

impl Offer {
    pub fn field(&self, name: &str) -> String {
        match name {
            "offer_id" => self.offer_id.clone(),
            "title" => self.title.clone(),
            "start_date_time" => self.start_date_time.clone(),
            "end_date_time" => self.end_date_time.clone(),
            "redeem_limit_per_user" => self.redeem_limit_per_user.to_string(),
            "public_coupon_code" => self.public_coupon_code.clone(),
            "application_type" => self.application_type.as_str().to_string(),
            "min_subtotal" => self.min_subtotal.clone(),
            "value_type" => self.value_type.as_str().to_string(),
            "fixed_amount_off" => self.fixed_amount_off.clone(),
            "percent_off" => self.percent_off.clone(),
            "target_granularity" => self.target_granularity.as_str().to_string(),
            "target_selection" => self.target_selection.to_string(),
            "target_type" => self.target_type.as_str().to_string(),
            "target_shipping_option_types" => self.target_shipping_option_types.clone(),
            "min_quantity" => self.min_quantity.clone(),
            "target_quantity" => self.target_quantity.clone(),
            _ => String::new(),
        }
    }

    /// Renders the offer as a row in [`PROMOTION_FIELDS`] order.
    pub fn to_row(&self) -> Vec<String> {
        PROMOTION_FIELDS.iter().map(|f| self.field(f)).collect()
    }
}

// =============================================================================
// Translator
// =============================================================================

/// How offer ids are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfferIdPolicy {
    /// A fresh random id on every build.
    #[default]
    Random,
    /// A UUIDv5 of the rule id; identical across rebuilds.
    StableFromRule,
}

/// Builds [`Offer`]s for one store.
pub struct PromotionTranslator<'a> {
    store: &'a StoreContext,
    offer_ids: OfferIdPolicy,
}

impl<'a> PromotionTranslator<'a> {
    pub fn new(store: &'a StoreContext, offer_ids: OfferIdPolicy) -> Self {
        PromotionTranslator { store, offer_ids }
    }

    /// Builds the offer for a rule, stamping open-ended rules with the current time.
    pub fn build(&self, rule: &DiscountRule) -> CoreResult<Offer> {
        self.build_at(rule, Utc::now())
    }

    /// Builds the offer for a rule as of `now`.
    pub fn build_at(&self, rule: &DiscountRule, now: DateTime<Utc>) -> CoreResult<Offer> {
        let (application_type, public_coupon_code) = match rule.coupon_type {
            CouponType::NoCoupon => (ApplicationType::AutomaticAtCheckout, String::new()),
            CouponType::SpecificCoupon => {
                let code = rule
                    .coupon_code
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| CoreError::unsupported(rule.rule_id, "specific coupon without a code"))?;
                (ApplicationType::BuyerApplied, code.to_string())
            }
            CouponType::AutoGenerated => {
                return Err(CoreError::unsupported(rule.rule_id, "auto-generated coupons"));
            }
        };

        let discount = self.discount_shape(rule)?;
        let min_subtotal = self.min_subtotal(rule)?;

        let start = rule
            .from_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        let end_date_time = rule
            .to_date
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .map(|dt| dt.and_utc().to_rfc3339())
            .unwrap_or_default();

        Ok(Offer {
            offer_id: self.offer_id(rule.rule_id),
            title: rule.name.trim().to_string(),
            start_date_time: start.to_rfc3339(),
            end_date_time,
            redeem_limit_per_user: rule.uses_per_customer,
            public_coupon_code,
            application_type,
            min_subtotal,
            value_type: discount.value_type,
            fixed_amount_off: discount.fixed_amount_off,
            percent_off: discount.percent_off,
            target_granularity: discount.granularity,
            target_selection: "ALL_CATALOG_PRODUCTS",
            target_type: discount.target_type,
            target_shipping_option_types: discount.shipping_option_types,
            min_quantity: String::new(),
            target_quantity: String::new(),
        })
    }

    fn offer_id(&self, rule_id: i64) -> String {
        match self.offer_ids {
            OfferIdPolicy::Random => Uuid::new_v4().simple().to_string(),
            OfferIdPolicy::StableFromRule => Uuid::new_v5(
                &OFFER_NAMESPACE,
                format!("{}:{}", self.store.store_id, rule_id).as_bytes(),
            )
            .simple()
            .to_string(),
        }
    }

    fn discount_shape(&self, rule: &DiscountRule) -> CoreResult<DiscountShape> {
        match rule.free_shipping {
            FreeShipping::ForShipment => {
                return Ok(DiscountShape {
                    value_type: ValueType::Percentage,
                    fixed_amount_off: String::new(),
                    percent_off: "100".to_string(),
                    granularity: TargetGranularity::ItemLevel,
                    target_type: TargetType::Shipping,
                    shipping_option_types: "STANDARD".to_string(),
                });
            }
            FreeShipping::ForMatchingItemsOnly => {
                return Err(CoreError::unsupported(rule.rule_id, "free shipping for matching items"));
            }
            FreeShipping::None => {}
        }

        match &rule.simple_action {
            SimpleAction::ByPercent => Ok(DiscountShape {
                value_type: ValueType::Percentage,
                fixed_amount_off: String::new(),
                percent_off: format_hundredths(rule.discount_amount),
                granularity: TargetGranularity::OrderLevel,
                target_type: TargetType::LineItem,
                shipping_option_types: String::new(),
            }),
            SimpleAction::ByFixed => Ok(DiscountShape {
                value_type: ValueType::FixedAmount,
                fixed_amount_off: self.store.format_price(Money::from_cents(rule.discount_amount))?,
                percent_off: String::new(),
                granularity: TargetGranularity::OrderLevel,
                target_type: TargetType::LineItem,
                shipping_option_types: String::new(),
            }),
            SimpleAction::CartFixed => Err(CoreError::unsupported(rule.rule_id, "cart_fixed action")),
            SimpleAction::BuyXGetY => Err(CoreError::unsupported(rule.rule_id, "buy_x_get_y action")),
            SimpleAction::Other(code) => {
                Err(CoreError::unsupported(rule.rule_id, format!("'{}' action", code)))
            }
        }
    }

    fn min_subtotal(&self, rule: &DiscountRule) -> CoreResult<String> {
        let condition = match rule.conditions.as_slice() {
            [] => return Ok(String::new()),
            [single] => single,
            more => {
                return Err(CoreError::unsupported_condition(
                    rule.rule_id,
                    format!("{} top-level conditions", more.len()),
                ));
            }
        };

        if condition.attribute != "base_subtotal" || condition.operator != ">=" {
            return Err(CoreError::unsupported_condition(
                rule.rule_id,
                format!("{} {}", condition.attribute, condition.operator),
            ));
        }

        let amount = Money::parse(&condition.value)?;
        self.store.format_price(amount)
    }
}

struct DiscountShape {
    value_type: ValueType,
    fixed_amount_off: String,
    percent_off: String,
    granularity: TargetGranularity,
    target_type: TargetType,
    shipping_option_types: String,
}

// =============================================================================
// Unit Tests
// =============================================================================
