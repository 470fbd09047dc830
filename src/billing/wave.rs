//! GraphQL client for the Wave public API.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use jiff::{Timestamp, civil::Date};
use reqwest::StatusCode;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::{
    billing::{BillingBackend, BillingError, NewInvoice, NewInvoiceItem},
    models::invoice::{Business, Invoice, LineItem},
};

pub const DEFAULT_ENDPOINT: &str = "https://gql.waveapps.com/graphql/public";

const PAGE_SIZE: u32 = 100;

const INVOICE_FIELDS: &str = r#"
fragment InvoiceFields on Invoice {
    id
    title
    viewUrl
    createdAt
    dueDate
    amountDue { value currency { code } }
    status
    customer { id name email }
    memo
    footer
    lastSentAt
    lastViewedAt
    items {
        product { name }
        quantity
        unitPrice
        subtotal { value }
    }
}
"#;

const BUSINESSES_QUERY: &str = r#"
query {
    businesses { edges { node { id name } } }
}
"#;

const ACCOUNTS_QUERY: &str = r#"
query Accounts($businessId: ID!) {
    business(id: $businessId) {
        accounts { edges { node { id name } } }
    }
}
"#;

const CUSTOMERS_QUERY: &str = r#"
query Customers($businessId: ID!) {
    business(id: $businessId) {
        customers(page: 1, pageSize: 100) { edges { node { id name email } } }
    }
}
"#;

const CUSTOMER_CREATE: &str = r#"
mutation CreateCustomer($input: CustomerCreateInput!) {
    customerCreate(input: $input) {
        didSucceed
        inputErrors { code message path }
        customer { id }
    }
}
"#;

const PRODUCT_CREATE: &str = r#"
mutation CreateProduct($input: ProductCreateInput!) {
    productCreate(input: $input) {
        didSucceed
        inputErrors { code message path }
        product { id }
    }
}
"#;

const INVOICE_DELETE: &str = r#"
mutation DeleteInvoice($input: InvoiceDeleteInput!) {
    invoiceDelete(input: $input) {
        didSucceed
        inputErrors { code message path }
    }
}
"#;

fn invoice_create_mutation() -> String {
    format!(
        r#"
mutation CreateInvoice($input: InvoiceCreateInput!) {{
    invoiceCreate(input: $input) {{
        didSucceed
        inputErrors {{ code message path }}
        invoice {{ ...InvoiceFields }}
    }}
}}
{INVOICE_FIELDS}"#
    )
}

fn invoices_query() -> String {
    format!(
        r#"
query Invoices($businessId: ID!, $page: Int!, $pageSize: Int!) {{
    business(id: $businessId) {{
        invoices(page: $page, pageSize: $pageSize) {{
            pageInfo {{ currentPage totalPages }}
            edges {{ node {{ ...InvoiceFields }} }}
        }}
    }}
}}
{INVOICE_FIELDS}"#
    )
}

// ---- wire types ----

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
    extensions: Option<ErrorExtensions>,
}

#[derive(Deserialize)]
struct ErrorExtensions {
    code: Option<String>,
}

#[derive(Deserialize, Debug)]
struct InputError {
    message: String,
    code: Option<String>,
    #[serde(default)]
    path: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationStatus {
    did_succeed: bool,
    #[serde(default)]
    input_errors: Vec<InputError>,
}

#[derive(Deserialize)]
struct Connection<T> {
    edges: Vec<Edge<T>>,
}

#[derive(Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Deserialize)]
struct NamedNode {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct CustomerNode {
    id: String,
    name: Option<String>,
    email: Option<String>,
}

/// Wave sends decimals either as JSON numbers or as strings such as
/// `"1,250.00"`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum Decimal {
    Number(f64),
    Text(String),
}

impl Decimal {
    fn value(&self) -> f64 {
        match self {
            Decimal::Number(n) => *n,
            Decimal::Text(s) => s.replace(',', "").trim().parse().unwrap_or(0.0),
        }
    }
}

#[derive(Deserialize)]
struct Money {
    value: Option<Decimal>,
    currency: Option<Currency>,
}

#[derive(Deserialize)]
struct Currency {
    code: Option<String>,
}

#[derive(Deserialize)]
struct ItemNode {
    product: Option<ProductNode>,
    quantity: Option<Decimal>,
    #[serde(rename = "unitPrice")]
    unit_price: Option<Decimal>,
    subtotal: Option<Money>,
}

#[derive(Deserialize)]
struct ProductNode {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceNode {
    id: String,
    title: Option<String>,
    view_url: Option<String>,
    created_at: Option<String>,
    due_date: Option<String>,
    amount_due: Option<Money>,
    status: Option<String>,
    customer: Option<CustomerNode>,
    memo: Option<String>,
    footer: Option<String>,
    last_sent_at: Option<String>,
    last_viewed_at: Option<String>,
    #[serde(default)]
    items: Vec<ItemNode>,
}

impl InvoiceNode {
    fn into_invoice(self, business: Business) -> Invoice {
        let items: Vec<LineItem> = self
            .items
            .into_iter()
            .filter_map(|item| {
                let product_name = item.product.and_then(|p| p.name)?;
                let quantity = item.quantity.map(|q| q.value()).unwrap_or(1.0);
                Some(LineItem {
                    product_name,
                    quantity: quantity.max(0.0).round() as u32,
                    unit_price: item.unit_price.map(|p| p.value()).unwrap_or(0.0),
                    total: item
                        .subtotal
                        .and_then(|s| s.value)
                        .map(|v| v.value())
                        .unwrap_or(0.0),
                })
            })
            .collect();

        let (amount, currency) = match self.amount_due {
            Some(money) => (
                money.value.map(|v| v.value()).unwrap_or(0.0),
                money.currency.and_then(|c| c.code),
            ),
            None => (0.0, None),
        };
        let customer = self.customer;

        Invoice {
            id: self.id,
            business,
            title: self
                .title
                .unwrap_or_else(|| String::from("Untitled Invoice")),
            display_title: None,
            view_url: self.view_url.unwrap_or_default(),
            created_at: parse_timestamp(self.created_at.as_deref()).unwrap_or_else(Timestamp::now),
            due_date: self.due_date.as_deref().and_then(parse_date),
            amount,
            status: self.status.unwrap_or_else(|| String::from("DRAFT")),
            customer_name: customer
                .as_ref()
                .and_then(|c| c.name.clone())
                .unwrap_or_else(|| String::from("Unknown Customer")),
            customer_email: customer
                .as_ref()
                .and_then(|c| c.email.clone())
                .unwrap_or_default(),
            customer_id: customer.map(|c| c.id),
            currency: currency.unwrap_or_else(|| String::from("USD")),
            memo: self.memo,
            footer: self.footer,
            last_sent_at: parse_timestamp(self.last_sent_at.as_deref()),
            last_viewed_at: parse_timestamp(self.last_viewed_at.as_deref()),
            items,
        }
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<Timestamp> {
    value.and_then(|s| s.parse().ok())
}

/// Due dates arrive either as `2024-03-01` or as a full timestamp.
fn parse_date(value: &str) -> Option<Date> {
    value.parse::<Date>().ok().or_else(|| {
        value
            .parse::<Timestamp>()
            .ok()
            .map(|t| t.to_zoned(jiff::tz::TimeZone::UTC).date())
    })
}

fn format_graphql_errors(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| {
            let code = e
                .extensions
                .as_ref()
                .and_then(|x| x.code.as_deref())
                .unwrap_or("no code");
            format!("[{}] {}", code, e.message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_input_errors(errors: &[InputError]) -> String {
    errors
        .iter()
        .map(|e| {
            let path = e
                .path
                .iter()
                .map(|p| match p {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(".");
            format!(
                "[{}] {} at path: {}",
                e.code.as_deref().unwrap_or("no code"),
                e.message,
                path
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_mutation(operation: &'static str, status: &MutationStatus) -> Result<(), BillingError> {
    if !status.input_errors.is_empty() {
        return Err(BillingError::InputErrors {
            operation,
            message: format_input_errors(&status.input_errors),
        });
    }
    if !status.did_succeed {
        return Err(BillingError::OperationFailed(operation));
    }
    Ok(())
}

fn money(value: f64) -> String {
    format!("{:.2}", value)
}

// ---- client ----

/// Talks to the Wave GraphQL endpoint with a bearer token. Business ids are
/// resolved by name once and cached for the life of the client.
pub struct WaveClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    business_ids: Mutex<HashMap<Business, String>>,
}

impl WaveClient {
    /// Every request, including connecting, gives up after `timeout`.
    pub fn new(endpoint: String, token: String, timeout: Duration) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            token,
            business_ids: Mutex::new(HashMap::new()),
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, BillingError> {
        tracing::debug!(endpoint = %self.endpoint, "Billing request");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BillingError::Authentication);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GraphQlResponse<T> = response.json().await?;
        if !body.errors.is_empty() {
            return Err(BillingError::Api(format_graphql_errors(&body.errors)));
        }
        body.data
            .ok_or_else(|| BillingError::InvalidResponse(String::from("response has no data")))
    }

    async fn business_id(&self, business: Business) -> Result<String, BillingError> {
        let mut cache = self.business_ids.lock().await;
        if let Some(id) = cache.get(&business) {
            return Ok(id.clone());
        }

        #[derive(Deserialize)]
        struct Data {
            businesses: Connection<NamedNode>,
        }

        let data: Data = self.execute(BUSINESSES_QUERY, json!({})).await?;
        let name = business.billing_name();
        let id = data
            .businesses
            .edges
            .into_iter()
            .map(|e| e.node)
            .find(|n| n.name == name)
            .map(|n| n.id)
            .ok_or_else(|| BillingError::BusinessNotFound(name.to_string()))?;

        cache.insert(business, id.clone());
        Ok(id)
    }

    /// Income and expense account ids for the business.
    async fn accounts(
        &self,
        business: Business,
        business_id: &str,
    ) -> Result<(String, String), BillingError> {
        #[derive(Deserialize)]
        struct Data {
            business: BusinessAccounts,
        }
        #[derive(Deserialize)]
        struct BusinessAccounts {
            accounts: Connection<NamedNode>,
        }

        let data: Data = self
            .execute(ACCOUNTS_QUERY, json!({ "businessId": business_id }))
            .await?;
        let accounts: Vec<NamedNode> = data
            .business
            .accounts
            .edges
            .into_iter()
            .map(|e| e.node)
            .collect();

        let (income, expense) = business.account_names();
        let find = |name: &str| {
            accounts
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.id.clone())
                .ok_or_else(|| BillingError::AccountNotFound(name.to_string()))
        };
        Ok((find(income)?, find(expense)?))
    }

    async fn find_or_create_customer(
        &self,
        business_id: &str,
        name: &str,
        email: &str,
    ) -> Result<String, BillingError> {
        #[derive(Deserialize)]
        struct Data {
            business: BusinessCustomers,
        }
        #[derive(Deserialize)]
        struct BusinessCustomers {
            customers: Connection<CustomerNode>,
        }

        let data: Data = self
            .execute(CUSTOMERS_QUERY, json!({ "businessId": business_id }))
            .await?;
        let existing = data.business.customers.edges.into_iter().find(|e| {
            e.node
                .email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        });
        if let Some(edge) = existing {
            tracing::debug!(customer_id = %edge.node.id, "Reusing billing customer");
            return Ok(edge.node.id);
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Created {
            customer_create: CustomerPayload,
        }
        #[derive(Deserialize)]
        struct CustomerPayload {
            #[serde(flatten)]
            status: MutationStatus,
            customer: Option<IdNode>,
        }

        let display_name = if name.trim().is_empty() {
            email.split('@').next().unwrap_or(email)
        } else {
            name
        };
        let created: Created = self
            .execute(
                CUSTOMER_CREATE,
                json!({ "input": {
                    "businessId": business_id,
                    "name": display_name,
                    "email": email,
                    "currency": "USD",
                }}),
            )
            .await?;
        check_mutation("customerCreate", &created.customer_create.status)?;
        created
            .customer_create
            .customer
            .map(|c| c.id)
            .ok_or_else(|| BillingError::InvalidResponse(String::from("customer missing")))
    }

    async fn create_product(
        &self,
        business_id: &str,
        item: &NewInvoiceItem,
        accounts: &(String, String),
    ) -> Result<String, BillingError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Created {
            product_create: ProductPayload,
        }
        #[derive(Deserialize)]
        struct ProductPayload {
            #[serde(flatten)]
            status: MutationStatus,
            product: Option<IdNode>,
        }

        let created: Created = self
            .execute(
                PRODUCT_CREATE,
                json!({ "input": {
                    "businessId": business_id,
                    "name": item.title,
                    "description": item.description,
                    "unitPrice": money(item.unit_price),
                    "incomeAccountId": accounts.0,
                    "expenseAccountId": accounts.1,
                }}),
            )
            .await?;
        check_mutation("productCreate", &created.product_create.status)?;
        created
            .product_create
            .product
            .map(|p| p.id)
            .ok_or_else(|| BillingError::InvalidResponse(String::from("product missing")))
    }
}

#[async_trait]
impl BillingBackend for WaveClient {
    async fn create_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, BillingError> {
        let business_id = self.business_id(invoice.business).await?;
        let customer_id = self
            .find_or_create_customer(&business_id, &invoice.customer_name, &invoice.customer_email)
            .await?;
        let accounts = self.accounts(invoice.business, &business_id).await?;

        let mut items = Vec::with_capacity(invoice.items.len());
        for item in &invoice.items {
            let product_id = self.create_product(&business_id, item, &accounts).await?;
            items.push(json!({
                "productId": product_id,
                "quantity": item.quantity,
                "unitPrice": money(item.unit_price),
            }));
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Created {
            invoice_create: InvoicePayload,
        }
        #[derive(Deserialize)]
        struct InvoicePayload {
            #[serde(flatten)]
            status: MutationStatus,
            invoice: Option<InvoiceNode>,
        }

        let created: Created = self
            .execute(
                &invoice_create_mutation(),
                json!({ "input": {
                    "businessId": business_id,
                    "customerId": customer_id,
                    "currency": "USD",
                    "status": "SAVED",
                    "dueDate": invoice.due_date.to_string(),
                    "memo": invoice.memo,
                    "title": invoice.title,
                    "items": items,
                }}),
            )
            .await?;
        check_mutation("invoiceCreate", &created.invoice_create.status)?;

        let node = created
            .invoice_create
            .invoice
            .ok_or_else(|| BillingError::InvalidResponse(String::from("invoice missing")))?;
        let mut issued = node.into_invoice(invoice.business);
        if issued.amount == 0.0 {
            issued.amount = invoice.total();
        }
        if issued.customer_email.is_empty() {
            issued.customer_email = invoice.customer_email.clone();
        }
        if issued.due_date.is_none() {
            issued.due_date = Some(invoice.due_date);
        }

        tracing::info!(invoice_id = %issued.id, business = invoice.business.billing_name(), "Invoice issued");
        Ok(issued)
    }

    async fn list_invoices(&self, business: Business) -> Result<Vec<Invoice>, BillingError> {
        #[derive(Deserialize)]
        struct Data {
            business: BusinessInvoices,
        }
        #[derive(Deserialize)]
        struct BusinessInvoices {
            invoices: InvoicePage,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct InvoicePage {
            page_info: PageInfo,
            edges: Vec<Edge<InvoiceNode>>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PageInfo {
            total_pages: u32,
        }

        let business_id = self.business_id(business).await?;
        let query = invoices_query();
        let mut invoices = vec![];
        let mut page = 1;

        loop {
            let data: Data = self
                .execute(
                    &query,
                    json!({ "businessId": business_id, "page": page, "pageSize": PAGE_SIZE }),
                )
                .await?;
            let result = data.business.invoices;
            invoices.extend(
                result
                    .edges
                    .into_iter()
                    .map(|e| e.node.into_invoice(business)),
            );

            if page >= result.page_info.total_pages {
                break;
            }
            page += 1;
        }

        tracing::debug!(business = business.billing_name(), count = invoices.len(), "Invoices listed");
        Ok(invoices)
    }

    async fn delete_invoice(&self, invoice_id: &str) -> Result<(), BillingError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Deleted {
            invoice_delete: MutationStatus,
        }

        let deleted: Deleted = self
            .execute(INVOICE_DELETE, json!({ "input": { "invoiceId": invoice_id } }))
            .await?;
        check_mutation("invoiceDelete", &deleted.invoice_delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_node_parsing() {
        let node: InvoiceNode = serde_json::from_value(json!({
            "id": "QnVzaW5lc3M6MQ==",
            "title": "Wedding film",
            "viewUrl": "https://next.waveapps.com/invoice/1",
            "createdAt": "2024-05-01T10:00:00.000Z",
            "dueDate": "2024-05-08",
            "amountDue": { "value": "1,250.50", "currency": { "code": "CAD" } },
            "status": "SENT",
            "customer": { "id": "c1", "name": "Jane Doe", "email": "jane@example.com" },
            "memo": null,
            "items": [
                { "product": { "name": "Edit" }, "quantity": "2", "unitPrice": "625.25", "subtotal": { "value": 1250.5 } },
                { "product": null, "quantity": 1 }
            ]
        }))
        .unwrap();

        let invoice = node.into_invoice(Business::CochranFilms);

        assert_eq!(invoice.amount, 1250.5);
        assert_eq!(invoice.currency, "CAD");
        assert_eq!(invoice.due_date, Some(jiff::civil::date(2024, 5, 8)));
        assert_eq!(invoice.customer_email, "jane@example.com");
        assert_eq!(invoice.items.len(), 1);
        assert_eq!(invoice.items[0].quantity, 2);
        assert_eq!(invoice.items[0].unit_price, 625.25);
    }

    #[test]
    fn test_sparse_invoice_node_gets_defaults() {
        let node: InvoiceNode = serde_json::from_value(json!({ "id": "x" })).unwrap();
        let invoice = node.into_invoice(Business::CourseCreatorAcademy);

        assert_eq!(invoice.title, "Untitled Invoice");
        assert_eq!(invoice.status, "DRAFT");
        assert_eq!(invoice.customer_name, "Unknown Customer");
        assert_eq!(invoice.currency, "USD");
        assert_eq!(invoice.amount, 0.0);
    }

    #[test]
    fn test_due_date_accepts_timestamps() {
        assert_eq!(
            parse_date("2024-05-08T00:00:00Z"),
            Some(jiff::civil::date(2024, 5, 8))
        );
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn test_input_error_formatting() {
        let status: MutationStatus = serde_json::from_value(json!({
            "didSucceed": false,
            "inputErrors": [
                { "code": "INVALID", "message": "is required", "path": ["input", "customerId"] }
            ]
        }))
        .unwrap();

        match check_mutation("invoiceCreate", &status) {
            Err(BillingError::InputErrors { operation, message }) => {
                assert_eq!(operation, "invoiceCreate");
                assert_eq!(message, "[INVALID] is required at path: input.customerId");
            }
            other => panic!("Expected InputErrors, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_mutation_without_input_errors() {
        let status: MutationStatus =
            serde_json::from_value(json!({ "didSucceed": false })).unwrap();
        assert!(matches!(
            check_mutation("invoiceDelete", &status),
            Err(BillingError::OperationFailed("invoiceDelete"))
        ));
    }

    #[test]
    fn test_graphql_errors_are_joined() {
        let body: GraphQlResponse<Value> = serde_json::from_value(json!({
            "errors": [
                { "message": "Not found", "extensions": { "code": "NOT_FOUND" } },
                { "message": "Bad" }
            ]
        }))
        .unwrap();

        assert_eq!(
            format_graphql_errors(&body.errors),
            "[NOT_FOUND] Not found\n[no code] Bad"
        );
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(500.0), "500.00");
        assert_eq!(money(19.999), "20.00");
    }
}
