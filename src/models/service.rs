use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Money;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub price: Money,
    pub category: Option<String>,
    pub is_active: bool,
    pub image_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewService {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub price: Money,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

/// Partial administrative edit. Duration changes never touch stored appointments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<u32>,
    pub price: Option<Money>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub image_url: Option<String>,
}

impl ServicePatch {
    pub fn apply(&self, service: &mut Service) {
        if let Some(name) = &self.name {
            service.name = name.clone();
        }
        if let Some(slug) = &self.slug {
            service.slug = slug.clone();
        }
        if let Some(description) = &self.description {
            service.description = Some(description.clone());
        }
        if let Some(duration) = self.duration_minutes {
            service.duration_minutes = duration;
        }
        if let Some(price) = self.price {
            service.price = price;
        }
        if let Some(category) = &self.category {
            service.category = Some(category.clone());
        }
        if let Some(is_active) = self.is_active {
            service.is_active = is_active;
        }
        if let Some(image_url) = &self.image_url {
            service.image_url = Some(image_url.clone());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSummary {
    pub id: i64,
    pub name: String,
    pub duration_minutes: u32,
    pub price: Money,
}

impl From<&Service> for ServiceSummary {
    fn from(s: &Service) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            duration_minutes: s.duration_minutes,
            price: s.price,
        }
    }
}

/// Catalogue installed on an empty database.
pub fn default_catalogue() -> Vec<NewService> {
    let entry = |name: &str, slug: &str, description: &str, duration: u32, cents: i64, category: &str| {
        NewService {
            name: name.to_string(),
            slug: slug.to_string(),
            description: Some(description.to_string()),
            duration_minutes: duration,
            price: Money::from_cents(cents).unwrap_or_default(),
            category: Some(category.to_string()),
            image_url: None,
        }
    };

    vec![
        entry("Hair Styling", "hair-styling", "Professional hair styling and cutting services", 90, 7500, "hair"),
        entry("Makeup Application", "makeup", "Professional makeup application for all occasions", 120, 9500, "makeup"),
        entry("Facial Treatment", "facial", "Rejuvenating facial treatments for healthy skin", 60, 6500, "skincare"),
        entry("Manicure & Pedicure", "manicure-pedicure", "Complete nail care and grooming services", 90, 5500, "nails"),
        entry("Waxing Services", "waxing", "Professional waxing for smooth skin", 45, 3500, "hair-removal"),
        entry("Bridal Package", "bridal-package", "Complete bridal package including hair, makeup, and styling", 240, 25000, "bridal"),
    ]
}
