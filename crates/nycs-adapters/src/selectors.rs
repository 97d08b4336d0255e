//! Structural queries against the directory markup.
//!
//! Every class match is exact (`[class="..."]`), not token-based: an element
//! that gains an extra class stops matching. When the site markup changes,
//! only this module should need editing.

/// Profile links on a listing page.
pub const LISTING_LINK: &str = r#"div[class="schools-list__item"] > a"#;
pub const LISTING_LINK_ATTR: &str = "href";

/// Heading that carries the school's display name.
pub const SCHOOL_TITLE: &str = r#"div[class="school__info"] > h1[class="school__title"]"#;

/// `Name: value` lines (gender, lunch program, ...).
pub const PARAMS_ITEM: &str = r#"div[class="school__params-item"]"#;

pub const BAR_GROUP_TITLE: &str =
    r#"div[class="school__stats-wrap"] > div[class="bar__group"] > h3[class="school__stats-title"]"#;
pub const BAR_NAME: &str =
    r#"div[class="school__stats-wrap"] div[class="bar"] > div[class="bar__header"] > span[class="bar__name"]"#;
pub const BAR_VALUE: &str =
    r#"div[class="school__stats-wrap"] div[class="bar"] > div[class="bar__header"] > span[class="bar__value"]"#;

pub const CHART_TITLE: &str = r#"div[class="school__stats-wrap"] > h3[class="school__stats-title school__stats-title--chart"]"#;

/// Chart regions in the order their titles appear: enrollment by grade,
/// ethnicity, then the second demographic doughnut.
pub const CHART_REGIONS: [&str; 3] = [
    r#"div[class="school__stats-wrap"] > div[class="chart-bar js-barChart"]"#,
    r#"div[class="school__stats-wrap"] > div[class="chart chart--1 js-doughnutChart"]"#,
    r#"div[class="school__stats-wrap"] > div[class="chart chart--2 js-doughnutChart"]"#,
];
pub const CHART_LABELS_ATTR: &str = "data-labels";
pub const CHART_VALUES_ATTR: &str = "data-values";
