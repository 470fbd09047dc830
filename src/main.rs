use std::{fmt::Display, sync::Arc};

use clap::{Parser, Subcommand};
use colored::*;
use jiff::civil::Date;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::{
    billing::{NewInvoiceItem, wave::WaveClient},
    config::Config,
    events::{EventBus, drain},
    identity::{OidcIdentityProvider, management::ManagementClient},
    models::{
        activity::ActivityEntry,
        invoice::Business,
        pricing::{self, EstimateRequest},
        project::ProjectStatus,
        session::Actor,
        store::Store,
        task::TaskPriority,
    },
    services::{
        activity, invoices,
        invoices::{
            CreateInvoiceParameters, CreateInvoiceWithItemsParameters, InvoiceBook,
            QuoteInvoiceParameters,
        },
        projects::{self, CreateProjectParameters},
        session,
        tasks::{self, AddTaskParameters},
        users,
    },
    stats::{ProfileStats, StatsRefresher},
    storage::{Storage, json::JsonFileStorage},
};

mod billing;
mod config;
mod events;
mod identity;
mod models;
mod services;
mod stats;
mod storage;
mod ui;

#[derive(Parser)]
#[command(
    name = "studiodesk",
    about = "Client projects, invoices and accounts for a video production studio"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with an access token from the identity provider
    Login { token: String },

    /// Sign out and forget the session
    Logout,

    /// Show the signed-in user
    Whoami {
        /// Print only the access token
        #[arg(long)]
        token: bool,
    },

    /// Email a password reset link
    ResetPassword { email: String },

    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Manage tasks inside a project
    #[command(subcommand)]
    Task(TaskCommands),

    /// Manage invoices
    #[command(subcommand)]
    Invoice(InvoiceCommands),

    /// Recent activity of the signed-in user
    #[command(subcommand)]
    Activity(ActivityCommands),

    /// Manage client accounts (admin only)
    #[command(subcommand)]
    Client(ClientCommands),

    /// Change your own profile
    #[command(subcommand)]
    Profile(ProfileCommands),

    /// Show invoice and client counts
    Stats {
        /// Keep refreshing until interrupted
        #[arg(short, long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// List projects
    List {
        /// Only projects of this client id (admin only)
        #[arg(short, long)]
        client: Option<String>,

        /// Include archived projects
        #[arg(short, long)]
        archived: bool,
    },
    /// Create a project
    Create {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long)]
        client_name: String,
        #[arg(long)]
        client_email: String,
        /// Owning client id, defaults to yourself
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long, default_value_t = 0.0)]
        amount: f64,
        /// Due date (e.g., "2025-03-01"), defaults to a week from now
        #[arg(long)]
        due: Option<String>,
    },
    /// Show a project and its tasks
    Show { project: String },
    /// Edit project details
    Update {
        project: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        client_name: Option<String>,
        #[arg(long)]
        client_email: Option<String>,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        due: Option<String>,
    },
    /// Move a project to a new status (admin only)
    Status {
        project: String,
        /// not-started, in-progress, on-hold, completed or cancelled
        status: ProjectStatus,
    },
    /// Set progress between 0 and 1 (admin only)
    Progress { project: String, progress: f64 },
    /// Archive a project
    Archive { project: String },
    /// Delete a project (admin only)
    Delete { project: String },
    /// Delete every project billed through an invoice (admin only)
    DeleteByInvoice { invoice_id: String },
    /// Link a project to an invoice
    Connect { project: String, invoice_id: String },
    /// Unlink every project from an invoice (admin only)
    Disconnect { invoice_id: String },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Add a task to a project
    Add {
        project: String,
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// low, medium or high
        #[arg(short, long, default_value = "medium")]
        priority: TaskPriority,
    },
    /// Edit a task
    Update {
        project: String,
        task: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<TaskPriority>,
    },
    /// Mark a task as done (admin only)
    Complete { project: String, task: String },
    /// Mark a task as not done (admin only)
    Reopen { project: String, task: String },
    /// Delete a task
    Delete { project: String, task: String },
}

#[derive(Subcommand)]
enum InvoiceCommands {
    /// List invoices
    List {
        /// Only invoices for this customer email (admin only)
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Issue a single-item invoice and open a project for it
    Create {
        /// cochran-films or course-creator-academy
        #[arg(short, long, default_value = "cochran-films")]
        business: Business,
        #[arg(long)]
        client_name: String,
        #[arg(long)]
        client_email: String,
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        #[arg(short, long)]
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Issue an invoice with several items, each as "title:price[:quantity]"
    CreateItems {
        #[arg(short, long, default_value = "cochran-films")]
        business: Business,
        #[arg(long)]
        client_name: String,
        #[arg(long)]
        client_email: String,
        #[arg(short, long = "item", action = clap::ArgAction::Append, required = true)]
        items: Vec<String>,
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete an invoice and unlink its projects (admin only)
    Delete { invoice_id: String },
    /// Change the title shown for an invoice
    Retitle { invoice_id: String, title: String },
    /// Show the service catalog
    Pricing,
    /// Price a service with its add-ons
    Estimate(EstimateArgs),
    /// Price a service and issue the invoice for it
    Quote {
        #[command(flatten)]
        estimate: EstimateArgs,
        /// Defaults to your own name
        #[arg(long)]
        client_name: Option<String>,
        /// Defaults to your own email
        #[arg(long)]
        client_email: Option<String>,
        #[arg(long)]
        due: Option<String>,
    },
}

#[derive(clap::Args)]
struct EstimateArgs {
    /// Catalog category, e.g. "Events" or "Course Creator Academy"
    category: String,
    /// Service within the category, e.g. "2 Hours"
    service: String,
    /// Add the raw files export
    #[arg(long)]
    raw_files: bool,
    #[arg(long, default_value_t = 0)]
    additional_hours: u32,
    /// Extra cameras (podcasts only)
    #[arg(long, default_value_t = 0)]
    extra_cameras: u32,
    #[arg(long, default_value_t = 1)]
    quantity: u32,
}

impl EstimateArgs {
    fn to_request(&self) -> EstimateRequest {
        EstimateRequest {
            category: self.category.clone(),
            service: self.service.clone(),
            raw_files: self.raw_files,
            additional_hours: self.additional_hours,
            extra_cameras: self.extra_cameras,
            quantity: self.quantity,
        }
    }
}

#[derive(Subcommand)]
enum ActivityCommands {
    /// Show recent activity
    List,
    /// Add a note to your activity
    Log {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Forget all activity
    Clear,
}

#[derive(Subcommand)]
enum ClientCommands {
    /// List client accounts
    List,
    /// Count client accounts
    Count,
    /// Create a client account
    Create { email: String, password: String },
    /// Change a client's email
    Email { user_id: String, email: String },
    /// Change a client's password
    Password { user_id: String, password: String },
    /// Delete a client account
    Delete { user_id: String },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Change your display name
    Name { name: String },
    /// Change your password
    Password { password: String },
}

/// Prints the error and exits with status 1.
fn or_exit<T, E: Display>(result: Result<T, E>) -> T {
    result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

fn parse_date(raw: Option<&str>) -> Option<Date> {
    raw.map(|raw| {
        raw.parse::<Date>().unwrap_or_else(|e| {
            eprintln!("Error: Invalid date '{}': {}", raw, e);
            eprintln!("\nExpected format: YYYY-MM-DD (e.g., 2025-03-01)");
            std::process::exit(1);
        })
    })
}

/// Parses "title:price" or "title:price:quantity". The title may itself
/// contain colons.
fn parse_item(raw: &str) -> Option<NewInvoiceItem> {
    let item = |title: &str, unit_price: f64, quantity: u32| NewInvoiceItem {
        title: title.trim().to_string(),
        description: String::new(),
        unit_price,
        quantity,
    };

    let (rest, last) = raw.rsplit_once(':')?;
    if let Some((title, price)) = rest.rsplit_once(':')
        && let (Ok(price), Ok(quantity)) = (price.trim().parse(), last.trim().parse())
    {
        return Some(item(title, price, quantity));
    }
    Some(item(rest, last.trim().parse().ok()?, 1))
}

/// Accepts a full project id, a unique id prefix or an exact title.
fn resolve_project(store: &Store, identifier: &str) -> Uuid {
    if let Ok(id) = identifier.parse::<Uuid>() {
        return id;
    }

    let matches: Vec<_> = store
        .projects
        .iter()
        .filter(|p| {
            p.id.to_string().starts_with(identifier) || p.title.eq_ignore_ascii_case(identifier)
        })
        .collect();

    match matches.as_slice() {
        [project] => project.id,
        [] => {
            eprintln!("Error: Project '{}' not found", identifier);
            std::process::exit(1);
        }
        _ => {
            eprintln!("Error: Project is ambiguous. Multiple projects found:");
            for project in matches {
                eprintln!("  - {} {}", &project.id.to_string()[..8], project.title);
            }
            eprintln!("\nPlease be more specific.");
            std::process::exit(1);
        }
    }
}

fn resolve_task(store: &Store, project_id: Uuid, identifier: &str) -> Uuid {
    if let Ok(id) = identifier.parse::<Uuid>() {
        return id;
    }
    let Some(project) = store.get_project(project_id) else {
        eprintln!("Error: Project not found: {}", project_id);
        std::process::exit(1);
    };

    let matches: Vec<_> = project
        .tasks
        .iter()
        .filter(|t| {
            t.id.to_string().starts_with(identifier) || t.title.eq_ignore_ascii_case(identifier)
        })
        .collect();

    match matches.as_slice() {
        [task] => task.id,
        [] => {
            eprintln!("Error: Task '{}' not found", identifier);
            std::process::exit(1);
        }
        _ => {
            eprintln!("Error: Task name is ambiguous. Multiple tasks found:");
            for task in matches {
                eprintln!("  - {}", task.title);
            }
            eprintln!("\nPlease be more specific or use the task id.");
            std::process::exit(1);
        }
    }
}

fn billing_client(config: &Config) -> WaveClient {
    let token = or_exit(config.billing_token());
    or_exit(WaveClient::new(
        config.billing_endpoint.clone(),
        token.to_string(),
        config.http_timeout,
    ))
}

fn identity_provider(config: &Config) -> OidcIdentityProvider {
    let domain = or_exit(config.identity_domain());
    let client_id = or_exit(config.identity_client_id());
    or_exit(OidcIdentityProvider::new(
        domain.to_string(),
        client_id.to_string(),
        config.http_timeout,
    ))
}

fn management_client(config: &Config) -> ManagementClient {
    let domain = or_exit(config.identity_domain());
    let (id, secret) = or_exit(config.management_credentials());
    or_exit(ManagementClient::new(
        domain.to_string(),
        id.to_string(),
        secret.to_string(),
        config.http_timeout,
    ))
}

fn signed_in(store: &Store, config: &Config) -> Actor {
    or_exit(session::current_actor(store, &config.admin_email))
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = or_exit(Config::from_env());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Create parent directory if it doesn't exist
    if let Some(parent) = config.data_path.parent() {
        std::fs::create_dir_all(parent).unwrap_or_else(|e| {
            eprintln!("Error: Failed to create data directory: {}", e);
            std::process::exit(1);
        });
    }

    let storage = JsonFileStorage::new(config.data_path.clone());
    let mut store = match storage.load() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: Failed to load store: {}", e);
            std::process::exit(1);
        }
    };

    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let mut book = InvoiceBook::default();

    match cli.command {
        Commands::Login { token } => {
            let identity = identity_provider(&config);
            let session =
                or_exit(session::login(&mut store, &storage, &bus, &identity, &token).await);
            println!(
                "{} Signed in as {} <{}>",
                "✓".green(),
                session.profile.name.bold(),
                session.profile.email
            );
        }
        Commands::Logout => match or_exit(session::logout(&mut store, &storage, &bus)) {
            Some(profile) => println!("{} Signed out {}", "✓".green(), profile.email),
            None => println!("Not signed in"),
        },
        Commands::Whoami { token } => {
            if !session::is_authenticated(&store) {
                println!("Not signed in");
                return;
            }
            if token {
                if let Some(access_token) = session::access_token(&store) {
                    println!("{}", access_token);
                }
                return;
            }
            let actor = signed_in(&store, &config);
            if let Some(profile) = session::current_profile(&store) {
                ui::render_profile(profile, &actor);
            }
            println!("  {:<8}{}\n", "Data".dimmed(), storage.path().display());
        }
        Commands::ResetPassword { email } => {
            let identity = identity_provider(&config);
            or_exit(
                session::request_password_reset(&mut store, &storage, &identity, &email).await,
            );
            println!("{} Password reset email sent to {}", "✓".green(), email);
        }

        Commands::Project(command) => {
            let actor = signed_in(&store, &config);
            run_project_command(command, &mut store, &storage, &bus, &actor, &config).await;
        }
        Commands::Task(command) => {
            let actor = signed_in(&store, &config);
            run_task_command(command, &mut store, &storage, &bus, &actor);
        }
        Commands::Invoice(InvoiceCommands::Pricing) => {
            ui::render_pricing(pricing::CATEGORIES, pricing::ADDITIONAL_SERVICES);
        }
        Commands::Invoice(InvoiceCommands::Estimate(args)) => {
            let estimate = or_exit(pricing::estimate(&args.to_request()));
            ui::render_estimate(&estimate);
        }
        Commands::Invoice(command) => {
            let actor = signed_in(&store, &config);
            let billing = billing_client(&config);
            match command {
                InvoiceCommands::List { email } => {
                    let invoices = or_exit(
                        invoices::fetch_invoices(
                            &store,
                            &bus,
                            &actor,
                            &billing,
                            &mut book,
                            email.as_deref(),
                        )
                        .await,
                    );
                    if invoices.is_empty() {
                        println!("No invoices");
                    } else {
                        ui::render_view_header("Invoices", invoices.len(), "invoice");
                        for invoice in &invoices {
                            ui::render_invoice_line(invoice);
                        }
                    }
                }
                InvoiceCommands::Create {
                    business,
                    client_name,
                    client_email,
                    amount,
                    quantity,
                    title,
                    description,
                    due,
                    notes,
                } => {
                    let parameters = CreateInvoiceParameters {
                        business,
                        client_name,
                        client_email,
                        amount,
                        description,
                        title,
                        due_date: parse_date(due.as_deref()),
                        notes,
                        quantity,
                    };
                    let created = or_exit(
                        invoices::create_invoice(
                            &mut store, &storage, &bus, &actor, &billing, &mut book, parameters,
                        )
                        .await,
                    );
                    println!(
                        "{} Created invoice {} and project {}",
                        "✓".green(),
                        created.invoice_id.bold(),
                        created.project.title.bold()
                    );
                    println!("  {}", created.view_url.underline());
                }
                InvoiceCommands::CreateItems {
                    business,
                    client_name,
                    client_email,
                    items,
                    due,
                    notes,
                } => {
                    let items = items
                        .iter()
                        .map(|raw| {
                            parse_item(raw).unwrap_or_else(|| {
                                eprintln!("Error: Invalid item '{}'", raw);
                                eprintln!("\nExpected format: title:price[:quantity]");
                                std::process::exit(1);
                            })
                        })
                        .collect();
                    let parameters = CreateInvoiceWithItemsParameters {
                        business,
                        client_name,
                        client_email,
                        items,
                        due_date: parse_date(due.as_deref()),
                        notes,
                    };
                    let created = or_exit(
                        invoices::create_invoice_with_items(
                            &mut store, &storage, &bus, &actor, &billing, &mut book, parameters,
                        )
                        .await,
                    );
                    println!(
                        "{} Created invoice {} ({})",
                        "✓".green(),
                        created.invoice_id.bold(),
                        ui::format_money(created.invoice.amount, &created.invoice.currency)
                    );
                    println!("  {}", created.view_url.underline());
                }
                InvoiceCommands::Delete { invoice_id } => {
                    or_exit(
                        invoices::fetch_invoices(&store, &bus, &actor, &billing, &mut book, None)
                            .await,
                    );
                    let deleted = or_exit(
                        invoices::delete_invoice(
                            &mut store,
                            &storage,
                            &bus,
                            &actor,
                            &billing,
                            &mut book,
                            &invoice_id,
                        )
                        .await,
                    );
                    println!(
                        "{} Deleted invoice {}",
                        "✓".green(),
                        deleted.invoice.display_title()
                    );
                    for project in &deleted.disconnected {
                        println!("  unlinked {}", project.title.dimmed());
                    }
                }
                InvoiceCommands::Retitle { invoice_id, title } => {
                    or_exit(
                        invoices::fetch_invoices(&store, &bus, &actor, &billing, &mut book, None)
                            .await,
                    );
                    let invoice = or_exit(invoices::retitle_invoice(
                        &mut store,
                        &storage,
                        &bus,
                        &actor,
                        &mut book,
                        &invoice_id,
                        &title,
                    ));
                    println!("{} Invoice is now '{}'", "✓".green(), invoice.display_title());
                }
                InvoiceCommands::Quote {
                    estimate,
                    client_name,
                    client_email,
                    due,
                } => {
                    let estimate = or_exit(pricing::estimate(&estimate.to_request()));
                    let profile = session::current_profile(&store);
                    let client_name = client_name
                        .or_else(|| profile.map(|p| p.name.clone()))
                        .unwrap_or_default();
                    let client_email = client_email
                        .or_else(|| profile.map(|p| p.email.clone()))
                        .unwrap_or_default();
                    ui::render_estimate(&estimate);

                    let parameters = QuoteInvoiceParameters {
                        estimate,
                        client_name,
                        client_email,
                        due_date: parse_date(due.as_deref()),
                    };
                    let created = or_exit(
                        invoices::create_invoice_from_estimate(
                            &mut store, &storage, &bus, &actor, &billing, &mut book, parameters,
                        )
                        .await,
                    );
                    println!(
                        "{} Created invoice {} and project {}",
                        "✓".green(),
                        created.invoice_id.bold(),
                        created.project.title.bold()
                    );
                    println!("  {}", created.view_url.underline());
                }
                // Offline commands, handled above
                InvoiceCommands::Pricing | InvoiceCommands::Estimate(_) => {}
            }
        }

        Commands::Activity(command) => {
            let actor = signed_in(&store, &config);
            match command {
                ActivityCommands::List => {
                    let entries = activity::list_activities(&store, &actor.user_id);
                    if entries.is_empty() {
                        println!("No recent activity");
                    } else {
                        ui::render_view_header("Activity", entries.len(), "item");
                        for entry in entries {
                            ui::render_activity_line(entry);
                        }
                    }
                }
                ActivityCommands::Log { title, description } => {
                    or_exit(activity::log_activity(
                        &mut store,
                        &storage,
                        &actor.user_id,
                        ActivityEntry::project_update(&title, description),
                    ));
                    println!("{} Logged {}", "✓".green(), title.bold());
                }
                ActivityCommands::Clear => {
                    let cleared =
                        or_exit(activity::clear_activities(&mut store, &storage, &actor.user_id));
                    println!("{} Cleared {} entries", "✓".green(), cleared);
                }
            }
        }

        Commands::Client(command) => {
            let actor = signed_in(&store, &config);
            let directory = management_client(&config);
            match command {
                ClientCommands::List => {
                    let clients = or_exit(users::list_clients(&actor, &directory).await);
                    if clients.is_empty() {
                        println!("No clients");
                    } else {
                        ui::render_view_header("Clients", clients.len(), "client");
                        for user in &clients {
                            ui::render_client_line(user);
                        }
                    }
                }
                ClientCommands::Count => {
                    let count = or_exit(users::count_clients(&actor, &directory).await);
                    println!("{}", count);
                }
                ClientCommands::Create { email, password } => {
                    let user =
                        or_exit(users::create_client(&actor, &directory, &email, &password).await);
                    println!("{} Created client {} ({})", "✓".green(), user.email, user.id);
                }
                ClientCommands::Email { user_id, email } => {
                    let user = or_exit(
                        users::update_client_email(&actor, &directory, &user_id, &email).await,
                    );
                    println!("{} {} now signs in as {}", "✓".green(), user.id, user.email);
                }
                ClientCommands::Password { user_id, password } => {
                    or_exit(
                        users::update_client_password(&actor, &directory, &user_id, &password)
                            .await,
                    );
                    println!("{} Password changed for {}", "✓".green(), user_id);
                }
                ClientCommands::Delete { user_id } => {
                    or_exit(users::delete_client(&actor, &directory, &user_id).await);
                    println!("{} Deleted client {}", "✓".green(), user_id);
                }
            }
        }

        Commands::Profile(command) => {
            let actor = signed_in(&store, &config);
            let directory = management_client(&config);
            match command {
                ProfileCommands::Name { name } => {
                    let name = or_exit(
                        users::update_display_name(&mut store, &storage, &actor, &directory, &name)
                            .await,
                    );
                    println!("{} Display name is now {}", "✓".green(), name.bold());
                }
                ProfileCommands::Password { password } => {
                    or_exit(
                        users::update_own_password(
                            &mut store, &storage, &actor, &directory, &password,
                        )
                        .await,
                    );
                    println!("{} Password changed", "✓".green());
                }
            }
        }

        Commands::Stats { watch: follow } => {
            let actor = signed_in(&store, &config);
            let billing = Arc::new(billing_client(&config));
            let directory = Arc::new(management_client(&config));

            if !follow {
                let stats =
                    stats::refresh(ProfileStats::default(), &actor, &*billing, &*directory).await;
                ui::render_stats(&stats, &actor);
            } else {
                let refresher = StatsRefresher {
                    actor: actor.clone(),
                    billing,
                    directory,
                    interval: config.stats_interval,
                };
                let (tx, mut rx) = watch::channel(ProfileStats::default());
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(stats::run(
                    refresher,
                    bus.subscribe(),
                    tx,
                    cancel.clone(),
                ));

                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            cancel.cancel();
                            break;
                        }
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let stats = *rx.borrow_and_update();
                            ui::render_stats(&stats, &actor);
                        }
                    }
                }
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Stats refresher panicked");
                }
            }
        }
    }

    for event in drain(&mut events) {
        book.handle_event(&event);
    }
}

async fn run_project_command(
    command: ProjectCommands,
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    config: &Config,
) {
    match command {
        ProjectCommands::List { client, archived } => {
            // Clients only ever see their own projects
            let scope = client.or_else(|| (!actor.is_admin()).then(|| actor.user_id.clone()));
            let projects: Vec<_> = or_exit(projects::fetch_projects(
                store,
                actor,
                scope.as_deref(),
                archived,
            ))
            .into_iter()
            .filter(|p| archived || !p.is_archived)
            .collect();
            if projects.is_empty() {
                println!("No projects");
                return;
            }
            let counts = projects::task_counts(&projects);
            ui::render_view_header("Projects", projects.len(), "project");
            for project in &projects {
                ui::render_project_line(project);
            }
            println!(
                "\n  {}",
                format!(
                    "{} open tasks, {} done",
                    counts.active, counts.completed
                )
                .dimmed()
            );
        }
        ProjectCommands::Create {
            title,
            description,
            client_name,
            client_email,
            client_id,
            amount,
            due,
        } => {
            let parameters = CreateProjectParameters {
                title,
                description,
                client_name,
                client_email,
                client_id,
                amount,
                invoice_id: None,
                due_date: parse_date(due.as_deref()),
            };
            let project = or_exit(projects::create_project(
                store, storage, bus, actor, parameters,
            ));
            println!(
                "{} Created project {} ({})",
                "✓".green(),
                project.title.bold(),
                &project.id.to_string()[..8]
            );
        }
        ProjectCommands::Show { project } => {
            let id = resolve_project(store, &project);
            let scope = (!actor.is_admin()).then_some(actor.user_id.as_str());
            let visible = or_exit(projects::fetch_projects(store, actor, scope, true));
            match visible.iter().find(|p| p.id == id) {
                Some(project) => ui::render_project_detail(project),
                None => {
                    eprintln!("Error: Project '{}' not found", project);
                    std::process::exit(1);
                }
            }
        }
        ProjectCommands::Update {
            project,
            title,
            description,
            client_name,
            client_email,
            amount,
            due,
        } => {
            let id = resolve_project(store, &project);
            let Some(mut edited) = store.get_project(id).cloned() else {
                eprintln!("Error: Project '{}' not found", project);
                std::process::exit(1);
            };
            if let Some(title) = title {
                edited.title = title;
            }
            if let Some(description) = description {
                edited.description = description;
            }
            if let Some(client_name) = client_name {
                edited.client_name = client_name;
            }
            if let Some(client_email) = client_email {
                edited.client_email = client_email;
            }
            if let Some(amount) = amount {
                edited.amount = amount;
            }
            if let Some(due_date) = parse_date(due.as_deref()) {
                edited.due_date = due_date;
            }
            let updated = or_exit(projects::update_project(store, storage, bus, actor, edited));
            println!("{} Updated {}", "✓".green(), updated.title.bold());
        }
        ProjectCommands::Status { project, status } => {
            let id = resolve_project(store, &project);
            let update = or_exit(projects::update_project_status(
                store, storage, bus, actor, id, status,
            ));
            if update.changed {
                println!(
                    "{} {}: {} → {}",
                    "✓".green(),
                    update.project.title.bold(),
                    update.previous.label(),
                    update.project.status.label()
                );
            } else {
                println!("{} is already {}", update.project.title, status.label());
            }
        }
        ProjectCommands::Progress { project, progress } => {
            let id = resolve_project(store, &project);
            let project = or_exit(projects::update_project_progress(
                store, storage, bus, actor, id, progress,
            ));
            println!(
                "{} {} is {:.0}% done",
                "✓".green(),
                project.title.bold(),
                project.progress * 100.0
            );
        }
        ProjectCommands::Archive { project } => {
            let id = resolve_project(store, &project);
            let project = or_exit(projects::archive_project(store, storage, bus, actor, id));
            println!("{} Archived {}", "✓".green(), project.title.bold());
        }
        ProjectCommands::Delete { project } => {
            let id = resolve_project(store, &project);
            let project = or_exit(projects::delete_project(store, storage, bus, actor, id));
            println!("{} Deleted {}", "✓".green(), project.title.bold());
        }
        ProjectCommands::DeleteByInvoice { invoice_id } => {
            let deleted = or_exit(projects::delete_projects_with_invoice(
                store,
                storage,
                bus,
                actor,
                &invoice_id,
            ));
            println!("{} Deleted {} projects", "✓".green(), deleted.len());
        }
        ProjectCommands::Connect {
            project,
            invoice_id,
        } => {
            let id = resolve_project(store, &project);
            let billing = billing_client(config);
            let project = or_exit(
                invoices::connect_invoice(store, storage, bus, actor, &billing, id, &invoice_id)
                    .await,
            );
            println!(
                "{} {} is billed through {}",
                "✓".green(),
                project.title.bold(),
                invoice_id
            );
        }
        ProjectCommands::Disconnect { invoice_id } => {
            let unlinked = or_exit(projects::disconnect_invoice(
                store,
                storage,
                bus,
                actor,
                &invoice_id,
            ));
            println!("{} Unlinked {} projects", "✓".green(), unlinked.len());
        }
    }
}

fn run_task_command(
    command: TaskCommands,
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
) {
    match command {
        TaskCommands::Add {
            project,
            title,
            description,
            priority,
        } => {
            let project_id = resolve_project(store, &project);
            let parameters = AddTaskParameters {
                project_id,
                title,
                description,
                priority,
            };
            let task = or_exit(tasks::add_task(store, storage, bus, actor, parameters));
            println!(
                "{} Added task {} ({} priority)",
                "✓".green(),
                task.title.bold(),
                task.priority.label()
            );
        }
        TaskCommands::Update {
            project,
            task,
            title,
            description,
            priority,
        } => {
            let project_id = resolve_project(store, &project);
            let task_id = resolve_task(store, project_id, &task);
            let Some(mut edited) = store
                .get_project(project_id)
                .and_then(|p| p.get_task(task_id))
                .cloned()
            else {
                eprintln!("Error: Task '{}' not found", task);
                std::process::exit(1);
            };
            if let Some(title) = title {
                edited.title = title;
            }
            if let Some(description) = description {
                edited.description = description;
            }
            if let Some(priority) = priority {
                edited.priority = priority;
            }
            let task = or_exit(tasks::update_task(
                store, storage, bus, actor, project_id, edited,
            ));
            println!("{} Updated task {}", "✓".green(), task.title.bold());
        }
        TaskCommands::Complete { project, task } => {
            set_completion(store, storage, bus, actor, &project, &task, true)
        }
        TaskCommands::Reopen { project, task } => {
            set_completion(store, storage, bus, actor, &project, &task, false)
        }
        TaskCommands::Delete { project, task } => {
            let project_id = resolve_project(store, &project);
            let task_id = resolve_task(store, project_id, &task);
            let task = or_exit(tasks::delete_task(
                store, storage, bus, actor, project_id, task_id,
            ));
            println!("{} Deleted task {}", "✓".green(), task.title.bold());
        }
    }
}

fn set_completion(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project: &str,
    task: &str,
    completed: bool,
) {
    let project_id = resolve_project(store, project);
    let task_id = resolve_task(store, project_id, task);
    let task = or_exit(tasks::set_task_completion(
        store, storage, bus, actor, project_id, task_id, completed,
    ));
    let verb = if completed { "Completed" } else { "Reopened" };
    println!("{} {} {}", "✓".green(), verb, task.title.bold());
}
