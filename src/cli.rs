use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Guard. Sign in. Stay live. - Access control and live updates for the faction portal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    Login {
        #[arg(help = "Account email (prompted if omitted)")]
        email: Option<String>,

        #[arg(long, help = "Two-factor code (prompted when the server asks for one)")]
        otp: Option<String>,
    },

    Logout,

    Whoami,

    /// Ask the policy whether the signed-in account may act on a resource
    Can {
        #[arg(help = "Resource kind, e.g. week_table or user_account")]
        resource: String,

        #[arg(help = "Action, e.g. view or manage_topics")]
        action: String,

        #[arg(long, help = "Faction the resource belongs to")]
        faction: Option<String>,

        #[arg(long, help = "Department the resource belongs to")]
        department: Option<String>,

        #[arg(long, help = "Role of the target account (user_account only)")]
        target_role: Option<String>,
    },

    /// Authenticated GET against the portal API
    Get {
        path: String,
    },

    /// Stream live updates until interrupted
    Watch {
        #[arg(help = "Departments to watch")]
        departments: Vec<String>,
    },

    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Init,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Login { email, otp } => crate::commands::login(email, otp).await,
        Commands::Logout => crate::commands::logout().await,
        Commands::Whoami => crate::commands::whoami().await,
        Commands::Can { resource, action, faction, department, target_role } => {
            crate::commands::can(resource, action, faction, department, target_role).await
        }
        Commands::Get { path } => crate::commands::get(path).await,
        Commands::Watch { departments } => crate::commands::watch(departments).await,
        Commands::Config { action } => {
            match action {
                Some(ConfigAction::Show) => crate::config::show_config().await,
                Some(ConfigAction::Init) => crate::config::init_config().await,
                None => crate::config::show_config().await,
            }
        }
    }
}
