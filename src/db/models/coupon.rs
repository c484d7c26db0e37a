//! Models mapping to the `coupons` and `coupon_usage` tables, plus the pure
//! discount rule evaluation used at apply-time and again at checkout.
use std::str::FromStr;

use sqlx::PgExecutor;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::{errors::DatabaseError, ConnectionPool, Transaction};

/// How a coupon's value is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscountType {
    /// `discount_value` is a whole-number percentage of the subtotal,
    /// optionally capped by `max_discount_amount`.
    Percentage,
    /// `discount_value` is a fixed amount in paise.
    Fixed,
}

impl FromStr for DiscountType {
    type Err = super::order::InvalidStatus;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "percentage" => Ok(Self::Percentage),
            "fixed" => Ok(Self::Fixed),
            other => Err(super::order::InvalidStatus(other.to_owned())),
        }
    }
}

/// A discount rule as stored in the database.
#[derive(sqlx::FromRow)]
pub struct Coupon {
    id: Uuid,
    /// Uppercased coupon code.
    pub code: String,
    discount_type: String,
    pub discount_value: i64,
    /// Minimum cart subtotal (paise) for the coupon to apply.
    pub min_order_amount: i64,
    /// Cap on a percentage discount, in paise.
    pub max_discount_amount: Option<i64>,
    /// Total number of redemptions allowed across all users.
    pub usage_limit: Option<i64>,
    /// Number of redemptions allowed per user.
    pub per_user_limit: Option<i64>,
    pub is_active: bool,
    pub valid_from: Option<PrimitiveDateTime>,
    pub valid_until: Option<PrimitiveDateTime>,
}

/// Reasons a coupon cannot be applied to a cart. Surfaced verbatim to the
/// client at apply-time.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CouponRejection {
    #[error("Coupon is not active")]
    Inactive,
    #[error("Coupon is not valid yet")]
    NotStarted,
    #[error("Coupon has expired")]
    Expired,
    #[error("Order subtotal below coupon minimum")]
    MinOrderNotMet {
        /// The minimum subtotal in paise the rule requires.
        minimum: i64,
    },
    #[error("Coupon usage limit reached")]
    UsageLimitReached,
    #[error("Coupon already used the maximum number of times")]
    PerUserLimitReached,
}

impl Coupon {
    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn discount_type(&self) -> DiscountType {
        self.discount_type
            .parse()
            .expect("Discount type in database is outside the closed set")
    }

    /// Select a coupon by its (uppercased) code.
    pub async fn select_by_code(
        code: &str,
        db_client: &ConnectionPool,
    ) -> Result<Option<Self>, DatabaseError> {
        Ok(sqlx::query_as::<_, Self>(
            "SELECT id, code, discount_type, discount_value, min_order_amount, \
             max_discount_amount, usage_limit, per_user_limit, is_active, valid_from, \
             valid_until FROM coupons WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(db_client)
        .await?)
    }

    /// Evaluate the rule against a subtotal and usage counts. Pure; callers
    /// supply the clock and the counts so this is unit-testable.
    pub fn validate(
        &self,
        subtotal: i64,
        now: PrimitiveDateTime,
        total_uses: i64,
        user_uses: i64,
    ) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err(CouponRejection::NotStarted);
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return Err(CouponRejection::Expired);
        }
        if subtotal < self.min_order_amount {
            return Err(CouponRejection::MinOrderNotMet {
                minimum: self.min_order_amount,
            });
        }
        if self.usage_limit.is_some_and(|limit| total_uses >= limit) {
            return Err(CouponRejection::UsageLimitReached);
        }
        if self.per_user_limit.is_some_and(|limit| user_uses >= limit) {
            return Err(CouponRejection::PerUserLimitReached);
        }
        Ok(())
    }

    /// The discount this rule yields on a given subtotal, in paise. Never
    /// exceeds the subtotal itself.
    pub fn discount_for(&self, subtotal: i64) -> i64 {
        let raw = match self.discount_type() {
            DiscountType::Percentage => {
                let pct = subtotal * self.discount_value / 100;
                match self.max_discount_amount {
                    Some(cap) => pct.min(cap),
                    None => pct,
                }
            }
            DiscountType::Fixed => self.discount_value,
        };
        raw.min(subtotal).max(0)
    }
}

/// One consumed usage unit, linking coupon, user and order. Written in the
/// same transaction as the order itself.
pub struct CouponUsage;

impl CouponUsage {
    pub async fn insert(
        coupon_id: Uuid,
        user_id: Uuid,
        order_id: Uuid,
        tx: &mut Transaction<'_>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO coupon_usage (coupon_id, user_id, order_id) VALUES ($1, $2, $3)")
            .bind(coupon_id)
            .bind(user_id)
            .bind(order_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn count_total(
        coupon_id: Uuid,
        executor: impl PgExecutor<'_>,
    ) -> Result<i64, DatabaseError> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM coupon_usage WHERE coupon_id = $1")
                .bind(coupon_id)
                .fetch_one(executor)
                .await?,
        )
    }

    pub async fn count_for_user(
        coupon_id: Uuid,
        user_id: Uuid,
        executor: impl PgExecutor<'_>,
    ) -> Result<i64, DatabaseError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM coupon_usage WHERE coupon_id = $1 AND user_id = $2",
        )
        .bind(coupon_id)
        .bind(user_id)
        .fetch_one(executor)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn coupon(discount_type: &str, value: i64, cap: Option<i64>) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            code: String::from("WELCOME10"),
            discount_type: discount_type.to_owned(),
            discount_value: value,
            min_order_amount: 100_000,
            max_discount_amount: cap,
            usage_limit: Some(100),
            per_user_limit: Some(1),
            is_active: true,
            valid_from: Some(datetime!(2025-01-01 00:00)),
            valid_until: Some(datetime!(2026-01-01 00:00)),
        }
    }

    const NOW: PrimitiveDateTime = datetime!(2025-06-15 12:00);

    #[test]
    fn percentage_discount_is_capped() {
        let coupon = coupon("percentage", 10, Some(30_000));
        assert_eq!(coupon.discount_for(200_000), 20_000);
        assert_eq!(coupon.discount_for(500_000), 30_000);
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let coupon = coupon("fixed", 150_000, None);
        assert_eq!(coupon.discount_for(100_000), 100_000);
        assert_eq!(coupon.discount_for(400_000), 150_000);
    }

    #[test]
    fn validation_enforces_minimum_and_window() {
        let coupon = coupon("percentage", 10, None);
        assert_eq!(
            coupon.validate(99_999, NOW, 0, 0),
            Err(CouponRejection::MinOrderNotMet { minimum: 100_000 })
        );
        assert_eq!(coupon.validate(100_000, NOW, 0, 0), Ok(()));
        assert_eq!(
            coupon.validate(100_000, datetime!(2024-12-31 23:59), 0, 0),
            Err(CouponRejection::NotStarted)
        );
        assert_eq!(
            coupon.validate(100_000, datetime!(2026-06-01 00:00), 0, 0),
            Err(CouponRejection::Expired)
        );
    }

    #[test]
    fn validation_enforces_usage_limits() {
        let coupon = coupon("percentage", 10, None);
        assert_eq!(
            coupon.validate(100_000, NOW, 100, 0),
            Err(CouponRejection::UsageLimitReached)
        );
        assert_eq!(
            coupon.validate(100_000, NOW, 5, 1),
            Err(CouponRejection::PerUserLimitReached)
        );
    }

    #[test]
    fn inactive_coupon_is_rejected() {
        let mut coupon = coupon("fixed", 10_000, None);
        coupon.is_active = false;
        assert_eq!(
            coupon.validate(200_000, NOW, 0, 0),
            Err(CouponRejection::Inactive)
        );
    }
}
