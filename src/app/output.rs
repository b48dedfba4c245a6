//! CLI output formatting: pretty text by default, JSON with `--json`.

use std::fmt::Write as _;

use anyhow::Result;
use ghtoken_core::{
    CompleteTokenInfo, IndividualTokenInfo, PermissionValue, Permissions, PossiblePermission,
    PossiblePermissions, StandardTokenInfo,
};
use serde::Serialize;

use crate::cli::SelectedToken;

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Permission lines; keys without access are left out.
fn format_permissions(out: &mut String, permissions: &Permissions) {
    let granted: Vec<_> = permissions
        .iter()
        .filter(|(_, value)| **value != PermissionValue::None)
        .collect();
    if granted.is_empty() {
        out.push_str("  permissions: none\n");
        return;
    }
    out.push_str("  permissions:\n");
    for (key, value) in granted {
        let _ = writeln!(out, "    {}: {value}", key.full_name());
    }
}

pub(crate) fn format_standard(token: &StandardTokenInfo) -> String {
    format!(
        "{}\n  id: {}\n  expires: {}\n  last used: {}\n",
        token.name, token.id, token.expires, token.last_used
    )
}

pub(crate) fn format_individual(token: &IndividualTokenInfo) -> String {
    let mut out = format!(
        "{}\n  id: {}\n  created: {}\n  expires: {}\n",
        token.name, token.id, token.created, token.expires
    );
    format_permissions(&mut out, &token.permissions);
    out
}

pub(crate) fn format_complete(token: &CompleteTokenInfo) -> String {
    let mut out = format!(
        "{}\n  id: {}\n  created: {}\n  expires: {}\n  last used: {}\n",
        token.name, token.id, token.created, token.expires, token.last_used
    );
    format_permissions(&mut out, &token.permissions);
    out
}

fn format_possible_group(out: &mut String, heading: &str, group: &[PossiblePermission]) {
    let _ = writeln!(out, "{heading}:");
    for permission in group {
        let values: Vec<_> = permission
            .allowed_values
            .iter()
            .map(ToString::to_string)
            .collect();
        let _ = writeln!(
            out,
            "  {} ({}): {}",
            permission.identifier,
            permission.name,
            values.join(", ")
        );
        if !permission.description.is_empty() {
            let _ = writeln!(out, "      {}", permission.description);
        }
    }
}

pub(crate) fn format_possible_permissions(possible: &PossiblePermissions) -> String {
    let mut out = String::new();
    format_possible_group(&mut out, "Repository permissions", &possible.repository);
    format_possible_group(&mut out, "Account permissions", &possible.account);
    out
}

pub(crate) fn print_tokens(tokens: &[StandardTokenInfo], json: bool) -> Result<()> {
    if json {
        return print_json(tokens);
    }
    if tokens.is_empty() {
        println!("No tokens.");
    }
    for token in tokens {
        print!("{}", format_standard(token));
    }
    Ok(())
}

pub(crate) fn print_individual(token: &IndividualTokenInfo, json: bool) -> Result<()> {
    if json {
        return print_json(token);
    }
    print!("{}", format_individual(token));
    Ok(())
}

pub(crate) fn print_complete(token: &CompleteTokenInfo, json: bool) -> Result<()> {
    if json {
        return print_json(token);
    }
    print!("{}", format_complete(token));
    Ok(())
}

pub(crate) fn print_possible_permissions(possible: &PossiblePermissions, json: bool) -> Result<()> {
    if json {
        return print_json(possible);
    }
    print!("{}", format_possible_permissions(possible));
    Ok(())
}

pub(crate) fn print_created(value: &str) {
    println!("Created token:");
    println!("{value}");
}

pub(crate) fn print_login(performed_login: bool) {
    if performed_login {
        println!("Logged in.");
    } else {
        println!("Already logged in.");
    }
}

pub(crate) fn nothing_to_delete_message(selected: &SelectedToken) -> String {
    match selected {
        SelectedToken::Name(name) => format!("No token named {name:?} found. Nothing to do."),
        SelectedToken::Id(id) => format!("No token with id {id} found. Nothing to do."),
    }
}
