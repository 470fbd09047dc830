use jiff::Timestamp;
use jiff::civil::Date;
use serde::{Deserialize, Serialize};

/// Display label forced onto education invoices.
pub const CCA_TITLE: &str = "CCA Education";

/// Substrings that mark an invoice title as an education invoice.
const CCA_MARKERS: [&str; 2] = ["Course Creator", "CCA"];

/// The two businesses that share one billing account.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Business {
    #[default]
    CochranFilms,
    CourseCreatorAcademy,
}

impl Business {
    pub const ALL: [Business; 2] = [Business::CochranFilms, Business::CourseCreatorAcademy];

    /// Name of the business as registered with the billing backend.
    pub fn billing_name(&self) -> &'static str {
        match self {
            Business::CochranFilms => "Cochran Films",
            Business::CourseCreatorAcademy => "Course Creator Academy LLC",
        }
    }

    /// Income and expense account names used when creating products.
    pub fn account_names(&self) -> (&'static str, &'static str) {
        match self {
            Business::CochranFilms => ("Sales", "Subcontracted Services"),
            Business::CourseCreatorAcademy => ("Sales", "Professional Fees"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown business '{0}', expected 'films' or 'cca'")]
pub struct ParseBusinessError(String);

impl std::str::FromStr for Business {
    type Err = ParseBusinessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "films" | "cochran-films" | "cochran_films" => Ok(Business::CochranFilms),
            "cca" | "course-creator-academy" | "course_creator_academy" => {
                Ok(Business::CourseCreatorAcademy)
            }
            _ => Err(ParseBusinessError(s.to_string())),
        }
    }
}

/// Normalizes an invoice title for display: anything that mentions the
/// education brand is shown under one fixed label.
pub fn normalize_title(title: &str) -> String {
    if CCA_MARKERS.iter().any(|marker| title.contains(marker)) {
        CCA_TITLE.to_string()
    } else {
        title.to_string()
    }
}

/// Title an invoice is issued under for a given business.
pub fn issued_title(business: Business, title: &str) -> String {
    match business {
        Business::CourseCreatorAcademy => CCA_TITLE.to_string(),
        Business::CochranFilms => normalize_title(title),
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LineItem {
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub total: f64,
}

/// A billing record owned by the external billing backend. Only ever held
/// transiently, in an [`crate::services::invoices::InvoiceBook`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub business: Business,
    pub title: String,
    /// Per-user override of `title`
    pub display_title: Option<String>,
    pub view_url: String,
    pub created_at: Timestamp,
    pub due_date: Option<Date>,
    pub amount: f64,
    pub status: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_id: Option<String>,
    pub currency: String,
    pub memo: Option<String>,
    pub footer: Option<String>,
    pub last_sent_at: Option<Timestamp>,
    pub last_viewed_at: Option<Timestamp>,
    pub items: Vec<LineItem>,
}

impl Invoice {
    pub fn display_title(&self) -> &str {
        self.display_title.as_deref().unwrap_or(&self.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title_matches_brand_markers() {
        assert_eq!(normalize_title("Course Creator Academy LLC"), CCA_TITLE);
        assert_eq!(normalize_title("CCA mentoring, March"), CCA_TITLE);
        assert_eq!(normalize_title("Wedding highlight reel"), "Wedding highlight reel");
    }

    #[test]
    fn test_normalize_title_is_case_sensitive() {
        assert_eq!(normalize_title("course creator session"), "course creator session");
        assert_eq!(normalize_title("cca"), "cca");
    }

    #[test]
    fn test_issued_title_for_education_business() {
        assert_eq!(
            issued_title(Business::CourseCreatorAcademy, "Coaching"),
            CCA_TITLE
        );
        assert_eq!(issued_title(Business::CochranFilms, "Coaching"), "Coaching");
    }
}
