//! License Admin CLI — create, edit, delete, and inspect organization licenses
//! against the console backend.

use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use console_client::ApiClient;
use console_core::config::AppConfig;
use console_licensing::keys::generate_license_key;
use console_licensing::{
    require_superuser, InMemoryBackend, License, LicenseDraft, LicenseError, LicensePatch,
    LicenseService, LicenseTier, Page, ValidationPolicy,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "license-admin")]
#[command(about = "License Console administration tool")]
#[command(version)]
struct Cli {
    /// Backend API base URL (overrides config)
    #[arg(long, global = true, env = "LICENSE_CONSOLE__API__BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for the backend (overrides config)
    #[arg(
        long,
        global = true,
        env = "LICENSE_CONSOLE__API__TOKEN",
        hide_env_values = true
    )]
    token: Option<String>,

    /// Run against a seeded in-memory backend instead of the REST API
    #[arg(long, global = true, default_value_t = false)]
    demo: bool,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List licenses
    List {
        #[arg(long, default_value_t = 0)]
        skip: u32,

        /// Page size (default from config)
        #[arg(long)]
        limit: Option<u32>,

        /// Only licenses of this organization (returned whole, not paged)
        #[arg(short, long, conflicts_with_all = ["skip", "limit"])]
        organization: Option<Uuid>,
    },

    /// Show one license with its derived status and modules
    Show { id: Uuid },

    /// Create a license for an organization
    Create {
        /// Owning organization UUID
        #[arg(short, long)]
        organization: Uuid,

        /// License key (generated by the backend if omitted)
        #[arg(short, long)]
        key: Option<String>,

        /// License tier: starter, business, enterprise
        #[arg(long, default_value = "starter")]
        tier: String,

        /// Max users (tier default if omitted)
        #[arg(long)]
        max_users: Option<i64>,

        /// Max locations (tier default if omitted)
        #[arg(long)]
        max_locations: Option<i64>,

        /// Max devices (tier default if omitted)
        #[arg(long)]
        max_devices: Option<i64>,

        /// Start of validity, RFC 3339 or YYYY-MM-DD (default: now)
        #[arg(long)]
        valid_from: Option<String>,

        /// End of validity, RFC 3339 or YYYY-MM-DD (default: one validity period later)
        #[arg(long)]
        valid_until: Option<String>,

        /// Comma-separated add-on modules
        #[arg(short, long, value_delimiter = ',')]
        addons: Vec<String>,

        /// Create the license deactivated
        #[arg(long, default_value_t = false)]
        inactive: bool,
    },

    /// Update a license (key and organization cannot change)
    Update {
        id: Uuid,

        #[arg(long)]
        tier: Option<String>,

        #[arg(long)]
        max_users: Option<i64>,

        #[arg(long)]
        max_locations: Option<i64>,

        #[arg(long)]
        max_devices: Option<i64>,

        #[arg(long)]
        valid_until: Option<String>,

        /// Administrative on/off switch
        #[arg(long)]
        active: Option<bool>,

        /// Replace the add-on module set (comma-separated, empty string clears)
        #[arg(long, value_delimiter = ',')]
        addons: Option<Vec<String>>,
    },

    /// Permanently delete a license
    Delete {
        id: Uuid,

        /// Confirm the irreversible delete
        #[arg(long, default_value_t = false)]
        yes: bool,
    },

    /// Show the license currently governing an organization
    Effective { organization: Uuid },

    /// List add-on modules known to the registry, and tier base modules
    Modules,

    /// List organizations
    Organizations {
        #[arg(long, default_value_t = 0)]
        skip: u32,

        #[arg(long)]
        limit: Option<u32>,
    },

    /// Generate license keys locally without contacting the backend
    GenerateKey {
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "license_admin=info,console_licensing=info,console_client=info".into()
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (mut config, load_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    init_tracing(config.log.json);
    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    // Apply CLI overrides
    if let Some(url) = cli.base_url.clone() {
        config.api.base_url = url;
    }
    if let Some(token) = cli.token.clone() {
        config.api.token = Some(token);
    }

    if let Err(e) = run(cli, config).await {
        report(&e);
        std::process::exit(1);
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<LicenseError>() {
        Some(LicenseError::Validation(errors)) => {
            eprintln!("License rejected:");
            for e in errors.iter() {
                eprintln!("  {:<15} {}", e.field, e.message);
            }
        }
        Some(LicenseError::Unauthorized(msg)) => {
            eprintln!("Access denied: {msg}. License administration requires a superuser.");
        }
        _ => eprintln!("Error: {err:#}"),
    }
}

async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    if let Commands::GenerateKey { count } = cli.command {
        for _ in 0..count {
            println!("{}", generate_license_key());
        }
        return Ok(());
    }

    let service = connect(&cli, &config).await?;
    let default_limit = config.licensing.default_page_size;
    let json = cli.json;

    match cli.command {
        Commands::List {
            skip,
            limit,
            organization,
        } => {
            let list = match organization {
                Some(org) => service.licenses_for_organization(org).await?,
                None => {
                    let page = Page {
                        skip,
                        limit: limit.unwrap_or(default_limit),
                    };
                    service.read_licenses(page).await?
                }
            };
            if json {
                return emit_json(&list);
            }
            print_license_table(&list.data);
            println!();
            println!("  Showing {} of {} licenses", list.data.len(), list.count);
        }
        Commands::Show { id } => {
            let license = service.get_license(id).await?;
            if json {
                return emit_json(&license);
            }
            print_license_detail(&license);
        }
        Commands::Create {
            organization,
            key,
            tier,
            max_users,
            max_locations,
            max_devices,
            valid_from,
            valid_until,
            addons,
            inactive,
        } => {
            let draft = LicenseDraft {
                license_key: key,
                tier: Some(tier),
                max_locations,
                max_users,
                max_devices,
                valid_from,
                valid_until,
                is_active: Some(!inactive),
                addon_modules: addons,
            };
            let license = service.create_license(organization, &draft).await?;
            if json {
                return emit_json(&license);
            }
            println!("License created successfully");
            println!();
            print_license_detail(&license);
        }
        Commands::Update {
            id,
            tier,
            max_users,
            max_locations,
            max_devices,
            valid_until,
            active,
            addons,
        } => {
            let patch = LicensePatch {
                tier,
                max_locations,
                max_users,
                max_devices,
                valid_until,
                is_active: active,
                addon_modules: addons.map(|list| {
                    list.into_iter()
                        .filter(|m| !m.trim().is_empty())
                        .collect()
                }),
                ..Default::default()
            };
            let license = service.update_license(id, &patch).await?;
            if json {
                return emit_json(&license);
            }
            println!("License updated successfully");
            println!();
            print_license_detail(&license);
        }
        Commands::Delete { id, yes } => {
            if !yes {
                eprintln!("This action cannot be undone. This will permanently delete the license.");
                eprintln!("Re-run with --yes to confirm.");
                anyhow::bail!("delete of {id} not confirmed");
            }
            let ack = service.delete_license(id).await?;
            if json {
                return emit_json(&ack);
            }
            println!("{}", ack.message);
        }
        Commands::Effective { organization } => {
            let license = service.effective_license(organization, Utc::now()).await?;
            if json {
                return emit_json(&license);
            }
            match license {
                Some(license) => print_license_detail(&license),
                None => println!("No active license for organization {organization}"),
            }
        }
        Commands::Modules => {
            let modules = service.list_modules().await?;
            if json {
                return emit_json(&modules);
            }
            println!("Registered modules:");
            println!();
            for m in &modules {
                println!("  {:<20} {:<10} {}", m.name, m.version, m.description);
            }
            println!();
            println!("Tier presets:");
            for tier in LicenseTier::ALL {
                let q = tier.default_quotas();
                println!(
                    "  {:<11} ({} locations, {} users, {} devices): {}",
                    tier.as_str(),
                    q.max_locations,
                    q.max_users,
                    q.max_devices,
                    tier.base_modules().join(", ")
                );
            }
        }
        Commands::Organizations { skip, limit } => {
            let page = Page {
                skip,
                limit: limit.unwrap_or(default_limit),
            };
            let orgs = service.list_organizations(page).await?;
            if json {
                return emit_json(&orgs);
            }
            println!(
                "  {:<38} {:<24} {:<12} {:<8} Contact",
                "ID", "Name", "Type", "Active"
            );
            println!("  {}", "-".repeat(110));
            for org in &orgs.data {
                println!(
                    "  {:<38} {:<24} {:<12} {:<8} {}",
                    org.id,
                    truncate(&org.name, 22),
                    org.kind,
                    if org.is_active { "yes" } else { "no" },
                    org.contact_email,
                );
            }
            println!();
            println!("  Total: {} organizations", orgs.count);
        }
        Commands::GenerateKey { .. } => {}
    }
    Ok(())
}

/// Build the service over the REST backend, or over seeded demo data.
async fn connect(cli: &Cli, config: &AppConfig) -> anyhow::Result<LicenseService> {
    let policy = ValidationPolicy::from(&config.licensing);

    if cli.demo {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed_demo_data();
        info!("using in-memory demo backend");
        return Ok(LicenseService::with_backend(backend, policy));
    }

    let client = Arc::new(ApiClient::from_config(&config.api)?);
    let me = client.current_user().await?;
    require_superuser(&me)?;
    info!(user = %me.email, base_url = %client.base_url(), "authenticated");
    Ok(LicenseService::with_backend(client, policy))
}

fn emit_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn print_license_table(licenses: &[License]) {
    let now = Utc::now();
    println!(
        "  {:<38} {:<20} {:<11} {:<9} {:<12} Quotas (loc/users/dev)",
        "ID", "License Key", "Tier", "Status", "Expires"
    );
    println!("  {}", "-".repeat(120));
    for l in licenses {
        let q = l.quotas();
        println!(
            "  {:<38} {:<20} {:<11} {:<9} {:<12} {}/{}/{}",
            l.id,
            truncate(&l.license_key, 20),
            l.tier.as_str(),
            l.status_at(now).to_string(),
            l.valid_until.format("%Y-%m-%d"),
            q.max_locations,
            q.max_users,
            q.max_devices,
        );
    }
}

fn print_license_detail(l: &License) {
    let now = Utc::now();
    println!("  License ID:       {}", l.id);
    println!("  Organization:     {}", l.organization_id);
    println!("  License key:      {}", l.license_key);
    println!("  Tier:             {}", l.tier);
    println!("  Status:           {}", l.status_at(now));
    println!("  Max locations:    {}", l.max_locations);
    println!("  Max users:        {}", l.max_users);
    println!("  Max devices:      {}", l.max_devices);
    println!(
        "  Valid from:       {}",
        l.valid_from.format("%Y-%m-%d %H:%M UTC")
    );
    println!(
        "  Valid until:      {}",
        l.valid_until.format("%Y-%m-%d %H:%M UTC")
    );
    if l.is_expired_at(now) {
        println!("  WARNING: License has EXPIRED!");
    } else {
        println!("  Days remaining:   {}", (l.valid_until - now).num_days());
    }
    let addons = if l.addon_modules.is_empty() {
        "-".to_string()
    } else {
        l.addon_modules.join(", ")
    };
    println!("  Add-on modules:   {addons}");
    let enabled: Vec<String> = l.enabled_modules().into_iter().collect();
    println!("  Enabled modules:  {}", enabled.join(", "));
}

fn truncate(s: &str, max: usize) -> String {
    if max < 3 {
        return s.chars().take(max).collect();
    }
    let char_count = s.chars().count();
    if char_count > max {
        let truncated: String = s.chars().take(max - 2).collect();
        format!("{truncated}..")
    } else {
        s.to_string()
    }
}
