use once_cell::sync::Lazy;

/// A subscription tier. `image_quota` of `None` means unlimited usage and
/// `duration_days` of `None` means the window never expires.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: &'static str,
    pub name: &'static str,
    pub image_quota: Option<i64>,
    pub duration_days: Option<i64>,
    pub ad_supported: bool,
    pub price_usd: f64,
    pub status_code: &'static str,
}

pub static PLANS: Lazy<Vec<Plan>> = Lazy::new(|| {
    vec![
        Plan {
            id: "free",
            name: "Free (Ads)",
            image_quota: Some(15),
            duration_days: None,
            ad_supported: true,
            price_usd: 0.0,
            status_code: "F",
        },
        Plan {
            id: "day25",
            name: "25 Images / 1 Day",
            image_quota: Some(25),
            duration_days: Some(1),
            ad_supported: false,
            price_usd: 1.19,
            status_code: "FD",
        },
        Plan {
            id: "week100",
            name: "100 Images / 1 Week",
            image_quota: Some(100),
            duration_days: Some(7),
            ad_supported: false,
            price_usd: 6.02,
            status_code: "FW",
        },
        Plan {
            id: "month1000",
            name: "1000 Images / 30 Days",
            image_quota: Some(1000),
            duration_days: Some(30),
            ad_supported: false,
            price_usd: 12.04,
            status_code: "FM",
        },
        Plan {
            id: "year_unlimited",
            name: "Unlimited / 1 Year",
            image_quota: None,
            duration_days: Some(365),
            ad_supported: false,
            price_usd: 99.99,
            status_code: "FY",
        },
        Plan {
            id: "god_mode",
            name: "God Mode (Unlimited Forever)",
            image_quota: None,
            duration_days: None,
            ad_supported: false,
            price_usd: 0.0,
            status_code: "G",
        },
    ]
});

pub fn plan(id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|plan| plan.id == id)
}

/// Accounts can carry plan ids that have since left the catalog; those rows
/// project as the free tier instead of failing.
pub fn plan_or_free(id: &str) -> &'static Plan {
    plan(id).unwrap_or_else(free_plan)
}

pub fn free_plan() -> &'static Plan {
    &PLANS[0]
}
