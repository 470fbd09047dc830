use std::collections::HashSet;

use jiff::civil::Date;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    billing::{BillingBackend, BillingError, NewInvoice, NewInvoiceItem},
    events::{AppEvent, EventBus},
    models::{
        activity::ActivityEntry,
        invoice::{Business, CCA_TITLE, Invoice, issued_title, normalize_title},
        pricing::{Estimate, RAW_FILES_PRICE},
        project::Project,
        session::{Actor, is_valid_email},
        store::Store,
    },
    services::projects::{
        self, ConnectInvoiceError, CreateProjectError, DisconnectInvoiceError, default_due_date,
    },
    storage::{Storage, StorageError},
};

/// The invoices fetched for the signed-in user, newest first and unique by
/// id. Only the invoice services mutate it.
#[derive(Debug, Default)]
pub struct InvoiceBook {
    invoices: Vec<Invoice>,
}

impl InvoiceBook {
    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    pub fn get(&self, invoice_id: &str) -> Option<&Invoice> {
        self.invoices.iter().find(|i| i.id == invoice_id)
    }

    /// Swaps the whole book for `invoices`, keeping the first copy of each id.
    pub fn replace(&mut self, invoices: Vec<Invoice>) {
        let mut seen = HashSet::new();
        self.invoices = invoices
            .into_iter()
            .filter(|i| seen.insert(i.id.clone()))
            .collect();
        self.sort();
    }

    pub fn insert(&mut self, invoice: Invoice) {
        self.invoices.retain(|i| i.id != invoice.id);
        self.invoices.push(invoice);
        self.sort();
    }

    pub fn remove(&mut self, invoice_id: &str) -> Option<Invoice> {
        let index = self.invoices.iter().position(|i| i.id == invoice_id)?;
        Some(self.invoices.remove(index))
    }

    pub fn clear(&mut self) {
        self.invoices.clear();
    }

    /// Invoices belong to whoever fetched them; a logout empties the book.
    pub fn handle_event(&mut self, event: &AppEvent) {
        if *event == AppEvent::UserLoggedOut {
            self.clear();
        }
    }

    fn sort(&mut self) {
        self.invoices
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

#[derive(Debug, Error)]
pub enum CreateInvoiceError {
    #[error("Client name cannot be empty")]
    EmptyClientName,

    #[error("Invalid client e-mail '{0}'")]
    InvalidEmail(String),

    #[error("Amount must be greater than zero, got {0}")]
    InvalidAmount(f64),

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("An invoice needs at least one item")]
    NoItems,

    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("Invoice was issued but its project could not be created: {0}")]
    Project(#[from] CreateProjectError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub struct CreateInvoiceParameters {
    pub business: Business,
    pub client_name: String,
    pub client_email: String,
    /// Unit price
    pub amount: f64,
    pub description: String,
    pub title: String,
    pub due_date: Option<Date>,
    pub notes: Option<String>,
    pub quantity: u32,
}

pub struct CreateInvoiceWithItemsParameters {
    pub business: Business,
    pub client_name: String,
    pub client_email: String,
    pub items: Vec<NewInvoiceItem>,
    pub due_date: Option<Date>,
    pub notes: Option<String>,
}

/// A priced estimate plus who it is billed to.
pub struct QuoteInvoiceParameters {
    pub estimate: Estimate,
    pub client_name: String,
    pub client_email: String,
    pub due_date: Option<Date>,
}

#[derive(Debug)]
pub struct CreatedInvoice {
    pub view_url: String,
    pub invoice_id: String,
    pub invoice: Invoice,
    pub project: Project,
}

fn validate_client(name: &str, email: &str) -> Result<(), CreateInvoiceError> {
    if name.trim().is_empty() {
        return Err(CreateInvoiceError::EmptyClientName);
    }
    if !is_valid_email(email) {
        return Err(CreateInvoiceError::InvalidEmail(email.to_string()));
    }
    Ok(())
}

fn validate_item(item: &NewInvoiceItem) -> Result<(), CreateInvoiceError> {
    if !(item.unit_price.is_finite() && item.unit_price > 0.0) {
        return Err(CreateInvoiceError::InvalidAmount(item.unit_price));
    }
    if item.quantity == 0 {
        return Err(CreateInvoiceError::InvalidQuantity);
    }
    Ok(())
}

/// Issues a single-line invoice, then creates the project that tracks it.
pub async fn create_invoice(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    billing: &dyn BillingBackend,
    book: &mut InvoiceBook,
    parameters: CreateInvoiceParameters,
) -> Result<CreatedInvoice, CreateInvoiceError> {
    let title = issued_title(parameters.business, &parameters.title);
    let item = NewInvoiceItem {
        title: title.clone(),
        description: parameters.description,
        unit_price: parameters.amount,
        quantity: parameters.quantity,
    };

    issue(
        store,
        storage,
        bus,
        actor,
        billing,
        book,
        NewInvoice {
            business: parameters.business,
            customer_name: parameters.client_name,
            customer_email: parameters.client_email,
            title,
            memo: parameters.notes,
            due_date: parameters.due_date.unwrap_or_else(default_due_date),
            items: vec![item],
        },
    )
    .await
}

/// Issues one invoice with several lines. The first line names the invoice
/// and the project.
pub async fn create_invoice_with_items(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    billing: &dyn BillingBackend,
    book: &mut InvoiceBook,
    parameters: CreateInvoiceWithItemsParameters,
) -> Result<CreatedInvoice, CreateInvoiceError> {
    let first = parameters
        .items
        .first()
        .ok_or(CreateInvoiceError::NoItems)?;
    let title = issued_title(parameters.business, &first.title);

    issue(
        store,
        storage,
        bus,
        actor,
        billing,
        book,
        NewInvoice {
            business: parameters.business,
            customer_name: parameters.client_name,
            customer_email: parameters.client_email,
            title,
            memo: parameters.notes,
            due_date: parameters.due_date.unwrap_or_else(default_due_date),
            items: parameters.items,
        },
    )
    .await
}

/// Issues the invoice for an estimate. Education packages go out as one
/// "CCA Education" line; raw files, when requested, become a second line
/// next to the service.
pub async fn create_invoice_from_estimate(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    billing: &dyn BillingBackend,
    book: &mut InvoiceBook,
    parameters: QuoteInvoiceParameters,
) -> Result<CreatedInvoice, CreateInvoiceError> {
    let estimate = parameters.estimate;
    if estimate.quantity == 0 {
        return Err(CreateInvoiceError::InvalidQuantity);
    }
    let unit_price = estimate.service_price() / f64::from(estimate.quantity);
    tracing::debug!(
        service = estimate.service,
        total = estimate.total(),
        "Invoicing estimate"
    );

    if estimate.business == Business::CourseCreatorAcademy {
        let parameters = CreateInvoiceParameters {
            business: estimate.business,
            client_name: parameters.client_name,
            client_email: parameters.client_email,
            amount: unit_price,
            description: format!("{}\nQuantity: {}", estimate.service, estimate.quantity),
            title: CCA_TITLE.to_string(),
            due_date: parameters.due_date,
            notes: None,
            quantity: estimate.quantity,
        };
        return create_invoice(store, storage, bus, actor, billing, book, parameters).await;
    }

    let description = format!(
        "Service: {}\nAdditional Hours: {}\nExtra Cameras: {}\nQuantity: {}",
        estimate.service, estimate.additional_hours, estimate.extra_cameras, estimate.quantity
    );
    if !estimate.raw_files {
        let parameters = CreateInvoiceParameters {
            business: estimate.business,
            client_name: parameters.client_name,
            client_email: parameters.client_email,
            amount: unit_price,
            description,
            title: estimate.line_title(),
            due_date: parameters.due_date,
            notes: None,
            quantity: estimate.quantity,
        };
        return create_invoice(store, storage, bus, actor, billing, book, parameters).await;
    }

    let items = vec![
        NewInvoiceItem {
            title: estimate.line_title(),
            description,
            unit_price,
            quantity: estimate.quantity,
        },
        NewInvoiceItem {
            title: String::from("Raw Files"),
            description: String::from("Raw video files export"),
            unit_price: RAW_FILES_PRICE,
            quantity: 1,
        },
    ];
    let parameters = CreateInvoiceWithItemsParameters {
        business: estimate.business,
        client_name: parameters.client_name,
        client_email: parameters.client_email,
        items,
        due_date: parameters.due_date,
        notes: None,
    };
    create_invoice_with_items(store, storage, bus, actor, billing, book, parameters).await
}

async fn issue(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    billing: &dyn BillingBackend,
    book: &mut InvoiceBook,
    new_invoice: NewInvoice,
) -> Result<CreatedInvoice, CreateInvoiceError> {
    // 1. Validate before touching the network
    validate_client(&new_invoice.customer_name, &new_invoice.customer_email)?;
    for item in &new_invoice.items {
        validate_item(item)?;
    }

    // 2. Issue remotely; the returned record is authoritative
    let invoice = billing.create_invoice(&new_invoice).await?;
    book.insert(invoice.clone());

    // 3. Track it as a project
    let project = projects::create_project_from_invoice(store, storage, bus, actor, &invoice)?;

    let previous = store.clone();
    store.record_activity(
        &actor.user_id,
        ActivityEntry::invoice_created(&new_invoice.title, new_invoice.total()),
    );
    storage.save_or_restore(store, previous)?;

    tracing::info!(
        invoice_id = %invoice.id,
        project_id = %project.id,
        amount = new_invoice.total(),
        "Invoice created"
    );
    bus.publish(AppEvent::InvoiceCreated {
        invoice_id: invoice.id.clone(),
    });

    Ok(CreatedInvoice {
        view_url: invoice.view_url.clone(),
        invoice_id: invoice.id.clone(),
        invoice,
        project,
    })
}

/// Lists both businesses. A business that fails is skipped; only when every
/// one fails is the last error returned.
pub(crate) async fn collect_invoices(
    billing: &dyn BillingBackend,
) -> Result<Vec<Invoice>, BillingError> {
    let mut invoices = vec![];
    let mut last_error = None;

    for business in Business::ALL {
        match billing.list_invoices(business).await {
            Ok(found) => invoices.extend(found),
            Err(e) => {
                tracing::warn!(business = business.billing_name(), error = %e, "Skipping business");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if invoices.is_empty() => Err(e),
        _ => Ok(invoices),
    }
}

#[derive(Debug, Error)]
pub enum FetchInvoicesError {
    #[error("Could not fetch invoices: {0}")]
    Billing(#[from] BillingError),
}

/// Refreshes the book. The admin sees everything unless `for_email` narrows
/// it; clients always see only invoices addressed to them.
pub async fn fetch_invoices(
    store: &Store,
    bus: &EventBus,
    actor: &Actor,
    billing: &dyn BillingBackend,
    book: &mut InvoiceBook,
    for_email: Option<&str>,
) -> Result<Vec<Invoice>, FetchInvoicesError> {
    let filter = if actor.is_admin() {
        for_email.map(str::to_lowercase)
    } else {
        Some(actor.email.to_lowercase())
    };

    let mut invoices = collect_invoices(billing).await?;
    if let Some(email) = &filter {
        invoices.retain(|i| i.customer_email.eq_ignore_ascii_case(email));
    }

    let overrides = store.user(&actor.user_id).map(|u| &u.invoice_titles);
    for invoice in invoices.iter_mut() {
        invoice.display_title = overrides
            .and_then(|o| o.get(&invoice.id).cloned())
            .or_else(|| {
                let normalized = normalize_title(&invoice.title);
                (normalized != invoice.title).then_some(normalized)
            });
    }

    book.replace(invoices);
    bus.publish(AppEvent::InvoicesRefreshed);

    tracing::debug!(count = book.invoices().len(), "Invoices refreshed");
    Ok(book.invoices().to_vec())
}

#[derive(Debug, Error)]
pub enum DeleteInvoiceError {
    #[error("Only the admin can delete invoices")]
    AdminOnly,

    #[error("Invoice '{0}' not found, refresh the invoice list first")]
    InvoiceNotFound(String),

    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("Invoice was deleted but its projects could not be updated: {0}")]
    Disconnect(#[from] DisconnectInvoiceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug)]
pub struct DeletedInvoice {
    pub invoice: Invoice,
    /// Projects that pointed at the invoice, as now persisted
    pub disconnected: Vec<Project>,
}

pub async fn delete_invoice(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    billing: &dyn BillingBackend,
    book: &mut InvoiceBook,
    invoice_id: &str,
) -> Result<DeletedInvoice, DeleteInvoiceError> {
    if !actor.is_admin() {
        return Err(DeleteInvoiceError::AdminOnly);
    }
    let invoice = book
        .get(invoice_id)
        .cloned()
        .ok_or_else(|| DeleteInvoiceError::InvoiceNotFound(invoice_id.to_string()))?;

    billing.delete_invoice(invoice_id).await?;
    book.remove(invoice_id);

    let disconnected = projects::disconnect_invoice(store, storage, bus, actor, invoice_id)?;

    let previous = store.clone();
    store.record_activity(
        &actor.user_id,
        ActivityEntry::invoice_deleted(invoice.display_title(), invoice.amount),
    );
    storage.save_or_restore(store, previous)?;

    tracing::info!(invoice_id, projects = disconnected.len(), "Invoice deleted");
    bus.publish(AppEvent::InvoiceDeleted {
        invoice_id: invoice_id.to_string(),
    });
    bus.publish(AppEvent::DashboardRefresh);

    Ok(DeletedInvoice {
        invoice,
        disconnected,
    })
}

#[derive(Debug, Error)]
pub enum RetitleInvoiceError {
    #[error("Invoice '{0}' not found, refresh the invoice list first")]
    InvoiceNotFound(String),

    #[error("Invoice title cannot be empty")]
    EmptyTitle,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Gives an invoice a personal display title. The billing record keeps its
/// real title; the override lives in the acting user's local data.
pub fn retitle_invoice(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    book: &mut InvoiceBook,
    invoice_id: &str,
    new_title: &str,
) -> Result<Invoice, RetitleInvoiceError> {
    let new_title = new_title.trim();
    if new_title.is_empty() {
        return Err(RetitleInvoiceError::EmptyTitle);
    }

    let mut invoice = book
        .get(invoice_id)
        .cloned()
        .ok_or_else(|| RetitleInvoiceError::InvoiceNotFound(invoice_id.to_string()))?;
    invoice.display_title = Some(new_title.to_string());

    let previous = store.clone();
    store
        .user_mut(&actor.user_id)
        .invoice_titles
        .insert(invoice_id.to_string(), new_title.to_string());
    store.record_activity(
        &actor.user_id,
        ActivityEntry::project_update(
            "Invoice Title Updated",
            format!("Invoice title was updated to '{}'", new_title),
        ),
    );
    storage.save_or_restore(store, previous)?;
    book.insert(invoice.clone());

    bus.publish(AppEvent::DashboardRefresh);
    Ok(invoice)
}

#[derive(Debug, Error)]
pub enum ConnectProjectInvoiceError {
    #[error("Could not fetch invoices: {0}")]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Connect(#[from] ConnectInvoiceError),
}

/// Looks the invoice up across every business and links it to the project.
pub async fn connect_invoice(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    billing: &dyn BillingBackend,
    project_id: Uuid,
    invoice_id: &str,
) -> Result<Project, ConnectProjectInvoiceError> {
    let mut invoices = collect_invoices(billing).await?;
    if !actor.is_admin() {
        invoices.retain(|i| i.customer_email.eq_ignore_ascii_case(&actor.email));
    }

    Ok(projects::connect_invoice(
        store, storage, bus, actor, project_id, invoice_id, &invoices,
    )?)
}
