//! Service catalog and the cost estimator built on top of it.

use thiserror::Error;

use crate::models::invoice::Business;

/// Flat add-on for handing over every file as shot.
pub const RAW_FILES_PRICE: f64 = 300.0;
/// Extra hours on any service bill at this rate unless the service has its
/// own hourly price.
pub const STANDARD_HOURLY_RATE: f64 = 250.0;
/// Per camera, per recorded hour. Podcasts only.
pub const EXTRA_CAMERA_HOURLY_RATE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingItem {
    pub title: &'static str,
    pub price: f64,
    pub description: &'static str,
    /// Rate charged for each extra hour when it differs from
    /// [`STANDARD_HOURLY_RATE`]
    pub hourly_rate: Option<f64>,
    /// Recorded hours the price covers, used to bill extra cameras
    pub hours: u32,
}

impl PricingItem {
    const fn new(title: &'static str, price: f64, description: &'static str) -> Self {
        Self {
            title,
            price,
            description,
            hourly_rate: None,
            hours: 0,
        }
    }

    const fn hourly(title: &'static str, price: f64, description: &'static str) -> Self {
        Self {
            title,
            price,
            description,
            hourly_rate: Some(price),
            hours: 1,
        }
    }

    const fn recorded(title: &'static str, price: f64, description: &'static str, hours: u32) -> Self {
        Self {
            title,
            price,
            description,
            hourly_rate: None,
            hours,
        }
    }

    /// Billed per hour, with the first hour included in `price`.
    pub fn is_hourly(&self) -> bool {
        self.hourly_rate.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingCategory {
    pub title: &'static str,
    pub business: Business,
    pub items: &'static [PricingItem],
    pub note: Option<&'static str>,
}

impl PricingCategory {
    pub fn item(&self, title: &str) -> Option<&'static PricingItem> {
        self.items
            .iter()
            .find(|item| item.title.eq_ignore_ascii_case(title.trim()))
    }

    fn offers_extra_cameras(&self) -> bool {
        self.title == "Podcast"
    }
}

/// Add-ons offered next to every Cochran Films service.
pub const ADDITIONAL_SERVICES: &[PricingItem] = &[
    PricingItem::new("Raw Files", RAW_FILES_PRICE, "All Files As They Were Shot"),
    PricingItem::new("Shooting", STANDARD_HOURLY_RATE, "Per Hour"),
];

/// Every category, education first.
pub const CATEGORIES: &[PricingCategory] = &[
    PricingCategory {
        title: "Course Creator Academy",
        business: Business::CourseCreatorAcademy,
        items: &[
            PricingItem::new("Job Shadow", 175.0, "Monthly Shadow + Creative Projects"),
            PricingItem::new("Curious Learner", 175.0, "1-Month Access + 2 Classes/Month"),
            PricingItem::new("3-Month Access", 575.0, "3-Month Access + 2 Classes/Month"),
            PricingItem::new("6-Month Access", 1050.0, "6-Month Access + 2 Classes/Month"),
            PricingItem::new("Full Year Access", 2000.0, "365-Day Access + 6 Free Shadows"),
        ],
        note: Some("2-Hour Classes, In-Person & Online"),
    },
    PricingCategory {
        title: "Events",
        business: Business::CochranFilms,
        items: &[
            PricingItem::new("2 Hours", 500.0, "Includes 60-Second Recap"),
            PricingItem::new("3 Hours", 750.0, "Includes 60-Second Recap"),
            PricingItem::new("5 Hours", 1250.0, "Includes 60-90 Second Recap"),
            PricingItem::new("8 Hours", 2000.0, "No Edits"),
            PricingItem::new("8 Hours with Recap", 2200.0, "Includes 60-Second Recap"),
        ],
        note: None,
    },
    PricingCategory {
        title: "Live Production",
        business: Business::CochranFilms,
        items: &[
            PricingItem::new("3 Hours", 2000.0, "Up to 3 Cameras + Production Edit"),
            PricingItem::new("5 Hours", 3000.0, "Up to 3 Cameras + Production Edit"),
            PricingItem::new("8 Hours", 4000.0, "Up to 3 Cameras + Production Edit"),
        ],
        note: Some("Up to 3 Cameras"),
    },
    PricingCategory {
        title: "Green Screen",
        business: Business::CochranFilms,
        items: &[
            PricingItem::hourly("Studio Rental Only", 40.0, "Per Hour"),
            PricingItem::new("30 Min - 1 Hour Session", 300.0, "Includes Edits"),
            PricingItem::new("2-3 Hour Session", 650.0, "Includes Edits"),
            PricingItem::new("4 Hour Session", 1000.0, "No Edits"),
            PricingItem::new("4 Hour Session with Edits", 1300.0, "Includes Edits"),
        ],
        note: None,
    },
    PricingCategory {
        title: "Podcast",
        business: Business::CochranFilms,
        items: &[
            PricingItem::recorded("1 Hour Podcast", 750.0, "2 Cameras + Edits", 1),
            PricingItem::recorded("2 Hour Podcast", 1000.0, "2 Cameras + Edits", 2),
            PricingItem::recorded("3 Hour Podcast", 1500.0, "2 Cameras + Edits", 3),
            PricingItem::hourly("Shoot Only", 250.0, "Per Hour"),
        ],
        note: Some("Extra Camera - $100/Hour"),
    },
];

pub fn category(title: &str) -> Option<&'static PricingCategory> {
    CATEGORIES
        .iter()
        .find(|c| c.title.eq_ignore_ascii_case(title.trim()))
}

#[derive(Debug, Error, PartialEq)]
pub enum EstimateError {
    #[error("Unknown category '{0}'")]
    UnknownCategory(String),

    #[error("'{category}' has no service named '{service}'")]
    UnknownService { category: String, service: String },

    #[error("{0} is not offered for this service")]
    AddOnNotOffered(&'static str),

    #[error("Quantity must be at least 1")]
    InvalidQuantity,
}

/// What the customer asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateRequest {
    pub category: String,
    pub service: String,
    pub raw_files: bool,
    pub additional_hours: u32,
    pub extra_cameras: u32,
    pub quantity: u32,
}

impl Default for EstimateRequest {
    fn default() -> Self {
        Self {
            category: String::new(),
            service: String::new(),
            raw_files: false,
            additional_hours: 0,
            extra_cameras: 0,
            quantity: 1,
        }
    }
}

/// A priced request. The total never depends on `quantity`; the service
/// line is split into `quantity` equal units instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub business: Business,
    pub category: &'static str,
    pub service: &'static str,
    pub base_price: f64,
    pub additional_hours: u32,
    pub additional_hours_cost: f64,
    pub extra_cameras: u32,
    pub extra_cameras_cost: f64,
    pub raw_files: bool,
    pub quantity: u32,
}

impl Estimate {
    /// Base price plus hours and cameras; everything but the raw files.
    pub fn service_price(&self) -> f64 {
        self.base_price + self.additional_hours_cost + self.extra_cameras_cost
    }

    pub fn raw_files_cost(&self) -> f64 {
        if self.raw_files { RAW_FILES_PRICE } else { 0.0 }
    }

    pub fn total(&self) -> f64 {
        self.service_price() + self.raw_files_cost()
    }

    /// "2 Hours - Events"
    pub fn line_title(&self) -> String {
        format!("{} - {}", self.service, self.category)
    }
}

pub fn estimate(request: &EstimateRequest) -> Result<Estimate, EstimateError> {
    let category = category(&request.category)
        .ok_or_else(|| EstimateError::UnknownCategory(request.category.clone()))?;
    let item = category
        .item(&request.service)
        .ok_or_else(|| EstimateError::UnknownService {
            category: category.title.to_string(),
            service: request.service.clone(),
        })?;
    if request.quantity == 0 {
        return Err(EstimateError::InvalidQuantity);
    }

    // Education packages are sold as they are.
    if category.business == Business::CourseCreatorAcademy {
        if request.raw_files {
            return Err(EstimateError::AddOnNotOffered("Raw files"));
        }
        if request.additional_hours > 0 {
            return Err(EstimateError::AddOnNotOffered("Additional hours"));
        }
    }
    if request.extra_cameras > 0 && !category.offers_extra_cameras() {
        return Err(EstimateError::AddOnNotOffered("Extra cameras"));
    }

    let hourly_rate = item.hourly_rate.unwrap_or(STANDARD_HOURLY_RATE);
    let additional_hours_cost = f64::from(request.additional_hours) * hourly_rate;

    // Hourly shoots record for their first hour plus every extra one.
    let camera_hours = if item.is_hourly() {
        item.hours + request.additional_hours
    } else {
        item.hours
    };
    let extra_cameras_cost =
        f64::from(request.extra_cameras) * EXTRA_CAMERA_HOURLY_RATE * f64::from(camera_hours);

    Ok(Estimate {
        business: category.business,
        category: category.title,
        service: item.title,
        base_price: item.price,
        additional_hours: request.additional_hours,
        additional_hours_cost,
        extra_cameras: request.extra_cameras,
        extra_cameras_cost,
        raw_files: request.raw_files,
        quantity: request.quantity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(category: &str, service: &str) -> EstimateRequest {
        EstimateRequest {
            category: category.to_string(),
            service: service.to_string(),
            ..EstimateRequest::default()
        }
    }

    #[test]
    fn test_event_with_raw_files() {
        let estimate = estimate(&EstimateRequest {
            raw_files: true,
            ..request("Events", "2 Hours")
        })
        .unwrap();

        assert_eq!(estimate.business, Business::CochranFilms);
        assert_eq!(estimate.service_price(), 500.0);
        assert_eq!(estimate.total(), 800.0);
        assert_eq!(estimate.line_title(), "2 Hours - Events");
    }

    #[test]
    fn test_studio_rental_bills_extra_hours_at_its_own_rate() {
        let estimate = estimate(&EstimateRequest {
            additional_hours: 3,
            ..request("green screen", "studio rental only")
        })
        .unwrap();

        assert_eq!(estimate.additional_hours_cost, 120.0);
        assert_eq!(estimate.total(), 160.0);
    }

    #[test]
    fn test_extra_hours_default_to_standard_rate() {
        let estimate = estimate(&EstimateRequest {
            additional_hours: 2,
            ..request("Live Production", "3 Hours")
        })
        .unwrap();

        assert_eq!(estimate.total(), 2500.0);
    }

    #[test]
    fn test_podcast_cameras_follow_recorded_hours() {
        let recorded = estimate(&EstimateRequest {
            extra_cameras: 2,
            ..request("Podcast", "2 Hour Podcast")
        })
        .unwrap();
        assert_eq!(recorded.extra_cameras_cost, 400.0);
        assert_eq!(recorded.total(), 1400.0);

        let shoot_only = estimate(&EstimateRequest {
            extra_cameras: 1,
            additional_hours: 2,
            ..request("Podcast", "Shoot Only")
        })
        .unwrap();
        // 250 base + 2 x 250 hours + 1 camera x 100 x 3 hours
        assert_eq!(shoot_only.total(), 1050.0);
    }

    #[test]
    fn test_quantity_does_not_change_total() {
        let estimate = estimate(&EstimateRequest {
            quantity: 4,
            ..request("Course Creator Academy", "3-Month Access")
        })
        .unwrap();

        assert_eq!(estimate.business, Business::CourseCreatorAcademy);
        assert_eq!(estimate.total(), 575.0);
        assert_eq!(estimate.quantity, 4);
    }

    #[test]
    fn test_rejected_requests() {
        assert_eq!(
            estimate(&request("Weddings", "2 Hours")),
            Err(EstimateError::UnknownCategory(String::from("Weddings")))
        );
        assert!(matches!(
            estimate(&request("Events", "9 Hours")),
            Err(EstimateError::UnknownService { .. })
        ));
        assert_eq!(
            estimate(&EstimateRequest {
                extra_cameras: 1,
                ..request("Events", "2 Hours")
            }),
            Err(EstimateError::AddOnNotOffered("Extra cameras"))
        );
        assert_eq!(
            estimate(&EstimateRequest {
                raw_files: true,
                ..request("Course Creator Academy", "Job Shadow")
            }),
            Err(EstimateError::AddOnNotOffered("Raw files"))
        );
        assert_eq!(
            estimate(&EstimateRequest {
                quantity: 0,
                ..request("Events", "2 Hours")
            }),
            Err(EstimateError::InvalidQuantity)
        );
    }

    #[test]
    fn test_catalog_lists_education_first() {
        assert_eq!(CATEGORIES[0].business, Business::CourseCreatorAcademy);
        assert!(
            CATEGORIES[1..]
                .iter()
                .all(|c| c.business == Business::CochranFilms)
        );
        assert_eq!(ADDITIONAL_SERVICES[0].price, RAW_FILES_PRICE);
    }
}
