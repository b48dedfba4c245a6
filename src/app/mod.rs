//! Application runtime: credential resolution, login retry, command dispatch.

pub(crate) mod output;
pub(crate) mod terminal;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ghtoken_core::auth::read_line_prompt;
use ghtoken_core::{
    CookieEncryption, Credentials, KeyringCredentialStore, NewToken, PermissionValue,
    PossiblePermissions, Session, SessionConfig, ThreadedPromptOtpProvider, TokenScope,
    prompt_for_credentials,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::cli::{Cli, Command, CreateArgs, DeleteArgs, GlobalArgs, InfoArgs, SelectedToken};

/// Login attempts before giving up, counting the first.
pub(crate) const MAX_LOGIN_ATTEMPTS: u32 = 3;

const SAVE_CREDENTIALS_PROMPT: &str = "success! save credentials to keyring (Y/n)? ";

pub(crate) async fn run() -> Result<ProcessExit> {
    let cli = Cli::parse();
    terminal::init_tracing(terminal::resolve_default_log_level(
        cli.global.quiet,
        cli.global.verbose,
    ));
    debug!(command = ?cli.command, "CLI arguments parsed");

    // the built-in permission list needs no session
    if let Command::PossiblePermissions(args) = &cli.command {
        if !args.fetch {
            output::print_possible_permissions(
                &PossiblePermissions::from_known(),
                cli.global.json,
            )?;
            return Ok(ProcessExit::Success);
        }
    }

    let store = KeyringCredentialStore::for_base_url(&cli.global.base_url);
    let resolved = resolve_credentials(&cli.global, &store).await?;
    let session = Session::open(
        resolved.credentials.clone(),
        Arc::new(ThreadedPromptOtpProvider),
        session_config(&cli.global),
    )?;

    let outcome = match login_with_retry(&session, &cli.global, resolved.prompted, &store).await {
        Ok(performed_login) => dispatch(&session, &cli, performed_login).await,
        Err(error) => Err(error),
    };
    let closed = session.close().await;
    let exit = outcome?;
    closed.context("failed to save session cookies")?;
    Ok(exit)
}

fn session_config(global: &GlobalArgs) -> SessionConfig {
    let mut config = SessionConfig::new().with_base_url(&global.base_url);
    if let Some(dir) = &global.persist {
        config = config.with_persist_dir(dir);
        if global.plaintext_cookies {
            config = config.with_cookie_encryption(CookieEncryption::Plaintext);
        }
    }
    config
}

struct ResolvedCredentials {
    credentials: Credentials,
    /// Password was typed in this run, so it may be offered for saving.
    prompted: bool,
}

/// Flags first, then the keychain, then the terminal.
async fn resolve_credentials(
    global: &GlobalArgs,
    store: &KeyringCredentialStore,
) -> Result<ResolvedCredentials> {
    let username = match &global.username {
        Some(username) => username.clone(),
        None => prompt_line("github username: ").await?,
    };
    if let Some(password) = &global.password {
        return Ok(ResolvedCredentials {
            credentials: Credentials::new(username, password.clone()),
            prompted: false,
        });
    }
    match store.load_password(&username) {
        Ok(Some(password)) => {
            debug!(service = store.service(), "using password from keychain");
            return Ok(ResolvedCredentials {
                credentials: Credentials::new(username, password),
                prompted: false,
            });
        }
        Ok(None) => {}
        Err(error) => warn!(%error, "could not read keychain"),
    }
    Ok(ResolvedCredentials {
        credentials: prompt_credentials(Some(username)).await?,
        prompted: true,
    })
}

/// Retries rejected credentials with newly prompted ones, unless both
/// username and password were given on the command line.
async fn login_with_retry(
    session: &Session,
    global: &GlobalArgs,
    mut prompted: bool,
    store: &KeyringCredentialStore,
) -> Result<bool> {
    let interactive = global.username.is_none() || global.password.is_none();
    let mut attempt = 1;
    loop {
        match session.login().await {
            Ok(performed_login) => {
                if performed_login && prompted {
                    offer_to_save(session.credentials(), store).await;
                }
                return Ok(performed_login);
            }
            Err(error)
                if error.is_login_error() && interactive && attempt < MAX_LOGIN_ATTEMPTS =>
            {
                eprintln!("{error}");
                warn!(attempt, "login failed; asking for new credentials");
                let credentials = prompt_credentials(global.username.clone()).await?;
                session.set_credentials(credentials).await;
                prompted = true;
                attempt += 1;
            }
            Err(error) => return Err(error.into()),
        }
    }
}

async fn offer_to_save(credentials: Arc<Credentials>, store: &KeyringCredentialStore) {
    let answer = match prompt_line(SAVE_CREDENTIALS_PROMPT).await {
        Ok(answer) => answer,
        Err(error) => {
            debug!(%error, "no answer to save prompt");
            return;
        }
    };
    if !wants_save(&answer) {
        return;
    }
    match store.save(&credentials) {
        Ok(()) => info!(username = %credentials.username, "credentials saved to keyring"),
        Err(error) => warn!(%error, "could not save credentials"),
    }
}

fn wants_save(answer: &str) -> bool {
    let answer = answer.trim();
    answer.is_empty() || answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

async fn prompt_line(prompt: &'static str) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        read_line_prompt(&mut io::stdin().lock(), &mut io::stderr(), prompt)
    })
    .await
    .context("prompt task failed")?
    .context("failed to read from terminal")
}

async fn prompt_credentials(username: Option<String>) -> Result<Credentials> {
    tokio::task::spawn_blocking(move || prompt_for_credentials(username.as_deref()))
        .await
        .context("prompt task failed")?
        .context("failed to read credentials")
}

async fn dispatch(session: &Session, cli: &Cli, performed_login: bool) -> Result<ProcessExit> {
    let json = cli.global.json;
    match &cli.command {
        Command::Login => output::print_login(performed_login),
        Command::List => output::print_tokens(&session.tokens().await?, json)?,
        Command::Info(args) => run_info(session, args, json).await?,
        Command::Create(args) => {
            let token = new_token(args)?;
            let value = session.create_token(&token).await?;
            output::print_created(&value);
        }
        Command::Delete(args) => return run_delete(session, args).await,
        Command::PossiblePermissions(args) => {
            let possible = session.possible_permissions().await?;
            if args.codegen {
                print!("{}", possible.to_enum_source());
            } else {
                output::print_possible_permissions(&possible, json)?;
            }
        }
    }
    Ok(ProcessExit::Success)
}

async fn run_info(session: &Session, args: &InfoArgs, json: bool) -> Result<()> {
    let selected = args.token.resolve().map_err(anyhow::Error::msg)?;
    match (selected, args.complete) {
        (SelectedToken::Id(id), false) => {
            output::print_individual(&session.token_info_by_id(id).await?, json)
        }
        (SelectedToken::Name(name), false) => {
            output::print_individual(&session.token_info_by_name(&name).await?, json)
        }
        (SelectedToken::Id(id), true) => {
            output::print_complete(&session.complete_token_info_by_id(id).await?, json)
        }
        (SelectedToken::Name(name), true) => {
            output::print_complete(&session.complete_token_info_by_name(&name).await?, json)
        }
    }
}

async fn run_delete(session: &Session, args: &DeleteArgs) -> Result<ProcessExit> {
    let selected = args.token.resolve().map_err(anyhow::Error::msg)?;
    let result = match &selected {
        SelectedToken::Id(id) => session.delete_token_by_id(*id).await,
        SelectedToken::Name(name) => session.delete_token_by_name(name).await,
    };
    match result {
        Ok(()) => {
            info!(token = ?selected, "deleted");
            Ok(ProcessExit::Success)
        }
        Err(error) if error.is_not_found() => {
            println!("{}", output::nothing_to_delete_message(&selected));
            if args.exit_code {
                Ok(ProcessExit::NothingToDelete)
            } else {
                Ok(ProcessExit::Success)
            }
        }
        Err(error) => Err(error.into()),
    }
}

fn new_token(args: &CreateArgs) -> Result<NewToken> {
    let token = match args.expires {
        Some(date) => NewToken::new(&args.name, date),
        None => NewToken::expiring_in(&args.name, args.expires_in_days),
    };
    let scope = if args.all_repositories {
        TokenScope::AllRepositories
    } else if args.repositories.is_empty() {
        TokenScope::PublicRepositories
    } else {
        TokenScope::SelectRepositories(args.repositories.clone())
    };
    let mut token = token.with_description(&args.description).with_scope(scope);
    if let Some(owner) = &args.resource_owner {
        token = token.with_resource_owner(owner);
    }
    let grants = args
        .read
        .iter()
        .map(|key| (*key, PermissionValue::Read))
        .chain(args.write.iter().map(|key| (*key, PermissionValue::Write)));
    for (key, value) in grants {
        if !key.allowed_values().contains(&value) {
            bail!("permission {key} cannot be granted {value} access");
        }
        token = token.with_permission(key, value);
    }
    Ok(token)
}
