//! # Discount Rule Repository
//!
//! Reads cart discount rules for the promotions feed. Codes that the
//! translator does not know are still loaded (as `Other`) when possible so
//! the translator can report them per rule. A row that cannot be decoded at
//! all is logged and left out; the other rules still load.

use chrono::NaiveDate;
use shopfeed_core::money::{format_hundredths, parse_scaled};
use shopfeed_core::promotion::{CouponType, DiscountRule, FreeShipping, RuleCondition, SimpleAction};
use sqlx::{FromRow, SqlitePool};

use crate::error::{DbError, DbResult};
use crate::repository::decode_each;

#[derive(Debug, FromRow)]
struct RuleRow {
    rule_id: i64,
    name: String,
    from_date: Option<NaiveDate>,
    to_date: Option<NaiveDate>,
    uses_per_customer: i64,
    coupon_type: String,
    coupon_code: Option<String>,
    simple_action: String,
    discount_amount: String,
    free_shipping: String,
    conditions: String,
}

impl TryFrom<RuleRow> for DiscountRule {
    type Error = DbError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let id = row.rule_id;
        let coupon_type = CouponType::from_code(&row.coupon_type)
            .ok_or_else(|| DbError::invalid_data("coupon_type", id, row.coupon_type.clone()))?;
        let free_shipping = FreeShipping::from_code(&row.free_shipping)
            .ok_or_else(|| DbError::invalid_data("free_shipping", id, row.free_shipping.clone()))?;
        let discount_amount = parse_scaled(&row.discount_amount, 2)
            .map_err(|e| DbError::invalid_data("discount_amount", id, e.to_string()))?;
        let conditions: Vec<RuleCondition> = serde_json::from_str(&row.conditions)
            .map_err(|e| DbError::invalid_data("conditions", id, e.to_string()))?;

        Ok(DiscountRule {
            rule_id: id,
            name: row.name,
            from_date: row.from_date,
            to_date: row.to_date,
            uses_per_customer: u32::try_from(row.uses_per_customer).unwrap_or(0),
            coupon_type,
            coupon_code: row.coupon_code,
            simple_action: SimpleAction::from_code(&row.simple_action),
            discount_amount,
            free_shipping,
            conditions,
        })
    }
}

/// Repository for discount rule reads.
#[derive(Debug, Clone)]
pub struct RuleRepository {
    pool: SqlitePool,
}

impl RuleRepository {
    /// Creates a new RuleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RuleRepository { pool }
    }

    /// Returns the store's active rules that have not expired by `today`.
    pub async fn active_for_store(&self, store_id: &str, today: NaiveDate) -> DbResult<Vec<DiscountRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"
            SELECT
                rule_id, name, from_date, to_date, uses_per_customer,
                coupon_type, coupon_code, simple_action, discount_amount,
                free_shipping, conditions
            FROM sales_rules
            WHERE store_id = ?1
            AND is_active = 1
            AND (to_date IS NULL OR to_date >= ?2)
            ORDER BY rule_id
            "#,
        )
        .bind(store_id)
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_each(rows, "sales_rule"))
    }

    /// Inserts or replaces a rule for a store.
    pub async fn upsert(&self, store_id: &str, rule: &DiscountRule, is_active: bool) -> DbResult<()> {
        let conditions = serde_json::to_string(&rule.conditions)
            .map_err(|e| DbError::invalid_data("conditions", rule.rule_id, e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sales_rules (
                rule_id, store_id, name, is_active, from_date, to_date,
                uses_per_customer, coupon_type, coupon_code, simple_action,
                discount_amount, free_shipping, conditions
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (rule_id) DO UPDATE SET
                store_id = excluded.store_id,
                name = excluded.name,
                is_active = excluded.is_active,
                from_date = excluded.from_date,
                to_date = excluded.to_date,
                uses_per_customer = excluded.uses_per_customer,
                coupon_type = excluded.coupon_type,
                coupon_code = excluded.coupon_code,
                simple_action = excluded.simple_action,
                discount_amount = excluded.discount_amount,
                free_shipping = excluded.free_shipping,
                conditions = excluded.conditions
            "#,
        )
        .bind(rule.rule_id)
        .bind(store_id)
        .bind(&rule.name)
        .bind(is_active)
        .bind(rule.from_date)
        .bind(rule.to_date)
        .bind(i64::from(rule.uses_per_customer))
        .bind(rule.coupon_type.as_code())
        .bind(&rule.coupon_code)
        .bind(rule.simple_action.as_code())
        .bind(format_hundredths(rule.discount_amount))
        .bind(rule.free_shipping.as_code())
        .bind(conditions)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
