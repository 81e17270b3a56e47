use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::PortalClient;
use crate::config::Config;
use crate::error::AuthError;
use crate::identity::Identity;
use crate::notifier::events::{Inbound, NOTIFICATION, STRUCTURE_CHANGED, TABLE_UPDATED};
use crate::notifier::transport::WsTransport;
use crate::notifier::{ConnectionState, Notifier};
use crate::policy::{self, Action, Resource, ResourceKind, Role};
use crate::screen::{Screen, View};
use crate::session::Session;

async fn open_session() -> Result<(Config, Arc<Session>)> {
    let config = Config::load()?;
    let session = Session::from_config(&config).context("Failed to build HTTP client")?;
    Ok((config, Arc::new(session)))
}

async fn require_identity(session: &Session) -> Result<Identity> {
    match session.restore().await? {
        Some(identity) => Ok(identity),
        None => anyhow::bail!("Not signed in. Run `warden login` first."),
    }
}

pub async fn login(email: Option<String>, otp: Option<String>) -> Result<()> {
    let (_, session) = open_session().await?;

    let email = match email {
        Some(email) => email,
        None => Input::new().with_prompt("Email").interact_text()?,
    };
    let password = Password::new().with_prompt("Password").interact()?;

    let identity = match session.sign_in(&email, &password, otp.as_deref()).await {
        Ok(identity) => identity,
        Err(AuthError::OtpRequired) => {
            println!("🔐 Two-factor code required");
            let code: String = Input::new().with_prompt("Code").interact_text()?;
            session.sign_in(&email, &password, Some(code.trim())).await?
        }
        Err(e) => return Err(e.into()),
    };

    println!("✅ Signed in as {} ({})", identity.full_name, identity.role);
    if policy::requires_two_factor(&identity.role) && otp.is_none() {
        println!("💡 This role should have two-factor authentication enabled");
    }
    Ok(())
}

pub async fn logout() -> Result<()> {
    let (_, session) = open_session().await?;

    if session.restore().await.ok().flatten().is_none() {
        println!("Not signed in");
        return Ok(());
    }

    session.sign_out().await;
    println!("✅ Signed out");
    Ok(())
}

pub async fn whoami() -> Result<()> {
    let (_, session) = open_session().await?;
    let identity = require_identity(&session).await?;

    println!("{} <{}>", identity.full_name, identity.email);
    println!("   Role: {}", identity.role);
    if let Some(faction) = identity.faction {
        println!("   Faction: {}", faction);
    }
    if let Some(ref department_id) = identity.department_id {
        println!("   Department: {}", department_id);
    }
    Ok(())
}

pub async fn can(
    resource: String,
    action: String,
    faction: Option<String>,
    department: Option<String>,
    target_role: Option<String>,
) -> Result<()> {
    let kind: ResourceKind = resource.parse()?;
    let action: Action = action.parse()?;

    let mut resource = Resource::new(kind);
    resource.target_role = target_role.map(Role::from);
    if let Some(faction) = faction {
        resource = resource.in_faction(faction.parse()?);
    }
    if let Some(department) = department {
        resource = resource.in_department(department);
    }

    let (_, session) = open_session().await?;
    let identity = session.restore().await.ok().flatten();

    if policy::can(identity.as_ref(), &resource, action) {
        println!("✅ allowed");
    } else {
        println!("❌ denied");
    }
    Ok(())
}

pub async fn get(path: String) -> Result<()> {
    let (_, session) = open_session().await?;
    require_identity(&session).await?;

    let client = PortalClient::new(Arc::clone(&session));
    let body = client.get(&path).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn watch(departments: Vec<String>) -> Result<()> {
    let (config, session) = open_session().await?;
    let identity = require_identity(&session).await?;

    let transport = Arc::new(WsTransport::new(config.live_update_url()));
    let notifier = Notifier::start(Arc::clone(&session), transport, config.reconnect);

    let me = identity.clone();
    let print_change = move |inbound: &Inbound| {
        if let Some(change) = inbound.change() {
            let own = if change.is_from(&me) { " (you)" } else { "" };
            println!(
                "🔄 {} in department {} by {}{}",
                inbound.event_name(),
                change.department_id,
                change.updated_by,
                own
            );
        }
    };
    let print_change = Arc::new(print_change);
    for event in [TABLE_UPDATED, STRUCTURE_CHANGED] {
        let handler = Arc::clone(&print_change);
        notifier.on(event, move |inbound| handler(inbound));
    }
    notifier.on(NOTIFICATION, |inbound| {
        if let Inbound::Notification(data) = inbound {
            println!("🔔 {}", data);
        }
    });

    let client = PortalClient::new(Arc::clone(&session));
    let mut screens = Vec::with_capacity(departments.len());
    for department_id in departments {
        let resource = Resource::new(ResourceKind::WeekTable).in_department(department_id.clone());
        let fetch_client = client.clone();
        let fetch_department = department_id.clone();
        let screen = Screen::mount(
            session.watch(),
            Some(&notifier),
            resource,
            &[Action::View, Action::Edit],
            move || {
                let client = fetch_client.clone();
                let department_id = fetch_department.clone();
                async move { client.current_week(&department_id).await }
            },
        );

        tokio::spawn(print_week(department_id, screen.watch()));
        screens.push(screen);
    }

    println!("👀 Watching as {} (Ctrl-C to stop)", identity.full_name);

    let mut state = notifier.watch_state();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("{}", indicator(current));
            }
        }
    }

    drop(screens);
    notifier.shutdown().await;
    println!("🛑 Stopped");
    Ok(())
}

async fn print_week(department_id: String, mut view: watch::Receiver<View<Value>>) {
    while view.changed().await.is_ok() {
        let current = view.borrow_and_update().clone();
        let line = match current {
            View::Loading => continue,
            View::Ready(week) => format!(
                "📋 {}: week {} loaded",
                department_id,
                week.get("id").and_then(Value::as_str).unwrap_or("?")
            ),
            View::Failed(e) => format!("❌ {}: {}", department_id, e),
        };
        println!("{}", line);
    }
}

fn indicator(state: ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "⚪ offline".to_string(),
        ConnectionState::Connecting { attempt } => format!("🟡 connecting (attempt {})", attempt),
        ConnectionState::Connected => "🟡 connected, authenticating".to_string(),
        ConnectionState::Authenticated => "🟢 live".to_string(),
    }
}
