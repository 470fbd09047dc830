//! Client side of the external invoicing service.
//!
//! The services only talk to a [`BillingBackend`]; [`wave::WaveClient`] is
//! the GraphQL implementation used at runtime.

use async_trait::async_trait;
use jiff::civil::Date;

use crate::models::invoice::{Business, Invoice};

pub mod wave;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Billing service rejected the access token")]
    Authentication,

    #[error("Billing service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Billing service error:\n{0}")]
    Api(String),

    #[error("{operation} rejected: {message}")]
    InputErrors {
        operation: &'static str,
        message: String,
    },

    #[error("{0} did not succeed")]
    OperationFailed(&'static str),

    #[error("Business '{0}' not found in the billing account")]
    BusinessNotFound(String),

    #[error("Account '{0}' not found for the business")]
    AccountNotFound(String),

    #[error("Unexpected billing response: {0}")]
    InvalidResponse(String),
}

/// One billed line. The backend creates a product for it on the fly.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoiceItem {
    pub title: String,
    pub description: String,
    pub unit_price: f64,
    pub quantity: u32,
}

impl NewInvoiceItem {
    pub fn total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoice {
    pub business: Business,
    pub customer_name: String,
    pub customer_email: String,
    pub title: String,
    pub memo: Option<String>,
    pub due_date: Date,
    pub items: Vec<NewInvoiceItem>,
}

impl NewInvoice {
    pub fn total(&self) -> f64 {
        self.items.iter().map(NewInvoiceItem::total).sum()
    }
}

#[async_trait]
pub trait BillingBackend: Send + Sync {
    /// Issues the invoice and returns it as the backend recorded it.
    async fn create_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, BillingError>;

    /// Every invoice of `business`, across all pages.
    async fn list_invoices(&self, business: Business) -> Result<Vec<Invoice>, BillingError>;

    async fn delete_invoice(&self, invoice_id: &str) -> Result<(), BillingError>;
}
