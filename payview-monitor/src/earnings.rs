//! Earnings formula
//!
//! Pure functions; the only numeric core of the engine. The delta returned
//! by [`calculate_earnings_delta`] is exactly what reconciliation applies to
//! a campaign budget.

/// Earnings in cents for `view_count` views at `cpm_rate_cents` per 1000 views
///
/// `round((views / 1000) * (cpm / 100) * 100)` rounded half-up to the cent,
/// capped at `max_payout_cents` when present. Negative inputs are treated
/// as zero.
pub fn calculate_earnings(view_count: i64, cpm_rate_cents: i64, max_payout_cents: Option<i64>) -> i64 {
    let views = view_count.max(0) as i128;
    let cpm = cpm_rate_cents.max(0) as i128;

    // views * cpm / 1000, half-up in integer arithmetic
    let cents = (views * cpm + 500) / 1000;
    let cents = i64::try_from(cents).unwrap_or(i64::MAX);

    match max_payout_cents {
        Some(max) => cents.min(max.max(0)),
        None => cents,
    }
}

/// Earnings change between two view counts under the same campaign terms
pub fn calculate_earnings_delta(
    old_view_count: i64,
    new_view_count: i64,
    cpm_rate_cents: i64,
    max_payout_cents: Option<i64>,
) -> i64 {
    calculate_earnings(new_view_count, cpm_rate_cents, max_payout_cents)
        - calculate_earnings(old_view_count, cpm_rate_cents, max_payout_cents)
}

/// Most views the remaining budget can still pay for at this CPM
///
/// `None` when the CPM is zero (views cost nothing, so no bound applies).
pub fn max_purchasable_views(remaining_budget_cents: i64, cpm_rate_cents: i64) -> Option<i64> {
    if cpm_rate_cents <= 0 {
        return None;
    }
    let remaining = remaining_budget_cents.max(0) as i128;
    let views = remaining * 1000 / cpm_rate_cents as i128;
    Some(i64::try_from(views).unwrap_or(i64::MAX))
}
