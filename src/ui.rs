use colored::*;
use jiff::{Timestamp, civil::Date};

use crate::{
    identity::management::ManagedUser,
    models::{
        activity::ActivityEntry,
        invoice::Invoice,
        pricing::{Estimate, PricingCategory, PricingItem},
        project::{Project, ProjectStatus},
        session::{Actor, UserProfile},
        task::{Task, TaskPriority},
    },
    stats::ProfileStats,
};

/// Get the terminal width, defaulting to 80 if unavailable
fn get_terminal_width() -> usize {
    term_size::dimensions().map(|(w, _)| w).unwrap_or(80)
}

/// Prints `left` and right-aligns `right` (dimmed) when the terminal is wide
/// enough. Widths are measured on the plain text, before styling.
fn print_aligned(left: &str, styled_left: ColoredString, right: &str) {
    let terminal_width = get_terminal_width();
    let total_content = left.chars().count() + right.chars().count();

    if !right.is_empty() && total_content + 4 < terminal_width {
        let padding = terminal_width - total_content - 2;
        println!("{}{}{}", styled_left, " ".repeat(padding), right.dimmed());
    } else {
        println!("{}", styled_left);
    }
}

pub fn get_status_glyph(status: ProjectStatus) -> ColoredString {
    match status {
        ProjectStatus::NotStarted => "○".normal(),
        ProjectStatus::InProgress => "◐".yellow(),
        ProjectStatus::OnHold => "◌".blue(),
        ProjectStatus::Completed => "✓".green(),
        ProjectStatus::Cancelled => "✗".dimmed(),
    }
}

fn priority_marker(priority: TaskPriority) -> ColoredString {
    match priority {
        TaskPriority::High => "!!".red(),
        TaskPriority::Medium => "! ".yellow(),
        TaskPriority::Low => "  ".normal(),
    }
}

/// Ten-cell bar, e.g. `█████░░░░░`
pub fn progress_bar(progress: f64) -> String {
    let filled = (progress.clamp(0.0, 1.0) * 10.0).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

pub fn format_money(amount: f64, currency: &str) -> String {
    if currency.eq_ignore_ascii_case("USD") {
        format!("${:.2}", amount)
    } else {
        format!("{:.2} {}", amount, currency)
    }
}

/// "Today", "Tomorrow", "Yesterday" or e.g. "Mar 01"
pub fn format_due_date(date: Date, today: Date) -> String {
    if date == today {
        "Today".to_string()
    } else if today.tomorrow().is_ok_and(|d| d == date) {
        "Tomorrow".to_string()
    } else if today.yesterday().is_ok_and(|d| d == date) {
        "Yesterday".to_string()
    } else {
        date.strftime("%b %d").to_string()
    }
}

/// Relative age of a timestamp: "just now", "5m ago", "3h ago", "2d ago",
/// falling back to the date after a week.
pub fn format_relative(timestamp: Timestamp, now: Timestamp) -> String {
    let seconds = now.as_second() - timestamp.as_second();
    match seconds {
        s if s < 60 => "just now".to_string(),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3600),
        s if s < 7 * 86_400 => format!("{}d ago", s / 86_400),
        _ => timestamp
            .to_zoned(jiff::tz::TimeZone::system())
            .strftime("%b %d")
            .to_string(),
    }
}

pub fn is_overdue(project: &Project, today: Date) -> bool {
    !project.is_archived
        && !matches!(
            project.status,
            ProjectStatus::Completed | ProjectStatus::Cancelled
        )
        && project.due_date < today
}

/// Render a view header with title and count
pub fn render_view_header(title: &str, count: usize, noun: &str) {
    let noun = if count == 1 {
        noun.to_string()
    } else {
        format!("{}s", noun)
    };
    println!("\n  {} ({} {})\n", title.cyan().bold(), count, noun);
}

/// Render a section header (e.g., "Tasks", "Archived")
pub fn render_section_header(title: &str) {
    println!("\n  ─── {} ───\n", title.bold());
}

pub fn render_empty(message: &str) {
    println!("  {}", message.dimmed());
}

/// One project per line: glyph, short id, title, progress, then client and
/// due date on the right.
pub fn render_project_line(project: &Project) {
    let today = jiff::Zoned::now().date();
    let short_id = &project.id.to_string()[..8];
    let left = format!(
        "  {}  {}  {}  {} {:>3.0}%",
        short_id,
        " ",
        project.title,
        progress_bar(project.progress),
        project.progress * 100.0
    );
    let styled_left = format!(
        "  {}  {}  {}  {} {:>3.0}%",
        short_id.dimmed(),
        get_status_glyph(project.status),
        project.title,
        progress_bar(project.progress),
        project.progress * 100.0
    );
    let styled_left = if project.is_archived {
        styled_left.dimmed()
    } else {
        styled_left.bold()
    };

    let due = format_due_date(project.due_date, today);
    let due = if is_overdue(project, today) {
        format!("overdue {}", due)
    } else {
        due
    };
    let right = format!("{}  ·  {}", project.client_name, due);

    print_aligned(&left, styled_left, &right);
}

pub fn render_project_detail(project: &Project) {
    let today = jiff::Zoned::now().date();

    println!(
        "\n  {} {}\n",
        get_status_glyph(project.status),
        project.title.cyan().bold()
    );
    if !project.description.is_empty() {
        println!("  {}\n", project.description);
    }
    println!("  {:<10}{}", "Id".dimmed(), project.id);
    println!("  {:<10}{}", "Status".dimmed(), project.status.label());
    println!(
        "  {:<10}{} {:.0}%",
        "Progress".dimmed(),
        progress_bar(project.progress),
        project.progress * 100.0
    );
    println!(
        "  {:<10}{} <{}>",
        "Client".dimmed(),
        project.client_name,
        project.client_email
    );
    println!("  {:<10}{}", "Amount".dimmed(), format_money(project.amount, "USD"));
    println!(
        "  {:<10}{}",
        "Invoice".dimmed(),
        project.invoice_id.as_deref().unwrap_or("none")
    );
    println!(
        "  {:<10}{}",
        "Due".dimmed(),
        format_due_date(project.due_date, today)
    );
    if project.is_archived {
        println!("  {}", "Archived".dimmed());
    }

    render_section_header(&format!(
        "Tasks {}/{}",
        project.completed_tasks_count(),
        project.tasks.len()
    ));
    if project.tasks.is_empty() {
        render_empty("No tasks yet");
    }
    for task in &project.tasks {
        render_task_line(task);
    }
}

pub fn render_task_line(task: &Task) {
    let glyph = if task.is_completed {
        "✓".dimmed()
    } else {
        "○".normal()
    };
    let short_id = &task.id.to_string()[..8];
    let left = format!("    {}  {}  {}  {}", short_id, "  ", " ", task.title);
    let styled = format!(
        "    {}  {}  {}  {}",
        short_id.dimmed(),
        priority_marker(task.priority),
        glyph,
        task.title
    );
    let styled = if task.is_completed {
        styled.dimmed()
    } else {
        styled.normal()
    };

    let right = match task.completed_at {
        Some(at) => format!("done {}", format_relative(at, Timestamp::now())),
        None => task.description.clone(),
    };
    print_aligned(&left, styled, &right);
}

pub fn render_invoice_line(invoice: &Invoice) {
    let amount = format_money(invoice.amount, &invoice.currency);
    let left = format!(
        "  {:<12}  {}  {}",
        invoice.status,
        invoice.display_title(),
        amount
    );
    let styled_left = format!(
        "  {:<12}  {}  {}",
        invoice.status.dimmed(),
        invoice.display_title().bold(),
        amount.green()
    )
    .normal();
    let right = format!(
        "{}  ·  {}",
        invoice.customer_name,
        format_relative(invoice.created_at, Timestamp::now())
    );
    print_aligned(&left, styled_left, &right);
    println!("    {}  {}", invoice.id.dimmed(), invoice.view_url.underline());
}

pub fn render_activity_line(entry: &ActivityEntry) {
    let when = format_relative(entry.timestamp, Timestamp::now());
    let left = format!("  {}  {}", entry.title, entry.description);
    let styled_left = format!("  {}  {}", entry.title.bold(), entry.description).normal();
    print_aligned(&left, styled_left, &when);
}

pub fn render_profile(profile: &UserProfile, actor: &Actor) {
    let role = if actor.is_admin() {
        "admin".magenta()
    } else {
        "client".normal()
    };
    println!("\n  {} ({})", profile.name.cyan().bold(), role);
    println!("  {:<8}{}", "Email".dimmed(), profile.email);
    println!("  {:<8}{}", "Id".dimmed(), profile.id);
    if let Some(picture) = &profile.picture_url {
        println!("  {:<8}{}", "Picture".dimmed(), picture);
    }
    println!();
}

pub fn render_stats(stats: &ProfileStats, actor: &Actor) {
    println!("\n  {}\n", "Statistics".cyan().bold());
    println!("  {:<10}{}", "Invoices".dimmed(), stats.invoice_count);
    if actor.is_admin() {
        println!("  {:<10}{}", "Clients".dimmed(), stats.client_count);
    }
    println!();
}

pub fn render_client_line(user: &ManagedUser) {
    let left = format!("  {}  {}", user.email, user.name);
    let styled_left = format!("  {}  {}", user.email.bold(), user.name.dimmed()).normal();
    let right = match user.last_login {
        Some(at) => format!(
            "{}  ·  last login {}",
            user.id,
            format_relative(at, Timestamp::now())
        ),
        None => user.id.clone(),
    };
    print_aligned(&left, styled_left, &right);
}

fn render_pricing_item(item: &PricingItem) {
    let price = if item.is_hourly() {
        format!("{}/hour", format_money(item.price, "USD"))
    } else {
        format_money(item.price, "USD")
    };
    let left = format!("    {:<28}{}", item.title, price);
    let styled_left = format!("    {:<28}{}", item.title, price.green()).normal();
    print_aligned(&left, styled_left, item.description);
}

pub fn render_pricing(categories: &[PricingCategory], add_ons: &[PricingItem]) {
    for category in categories {
        render_section_header(category.title);
        for item in category.items {
            render_pricing_item(item);
        }
        if let Some(note) = category.note {
            println!("    {}", note.dimmed());
        }
    }
    render_section_header("Add-ons");
    for item in add_ons {
        render_pricing_item(item);
    }
    println!();
}

/// Cost breakdown; lines that cost nothing are left out.
pub fn render_estimate(estimate: &Estimate) {
    let row = |label: &str, amount: f64| {
        println!("  {:<24}{:>12}", label, format_money(amount, "USD"));
    };

    println!("\n  {}\n", estimate.line_title().cyan().bold());
    row("Base price", estimate.base_price);
    if estimate.additional_hours > 0 {
        row(
            &format!("{} additional hours", estimate.additional_hours),
            estimate.additional_hours_cost,
        );
    }
    if estimate.extra_cameras > 0 {
        row(
            &format!("{} extra cameras", estimate.extra_cameras),
            estimate.extra_cameras_cost,
        );
    }
    if estimate.raw_files {
        row("Raw files", estimate.raw_files_cost());
    }
    println!(
        "  {:<24}{:>12}",
        "Total".bold(),
        format_money(estimate.total(), "USD").green().bold()
    );
    if estimate.quantity > 1 {
        println!(
            "  {}",
            format!(
                "Billed as {} x {}",
                estimate.quantity,
                format_money(estimate.service_price() / f64::from(estimate.quantity), "USD")
            )
            .dimmed()
        );
    }
    println!();
}
