//! Stateful fake of the token settings web interface.
//!
//! One [`Respond`] implementation routes every request by method and path and
//! keeps accounts, sessions, tokens and a request log behind a mutex. Pages
//! carry only the markup the default selectors read.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use ghtoken_core::PermissionKey;
use url::Url;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const USERNAME: &str = "octocat";
pub const PASSWORD: &str = "hunter2";
pub const OTP: &str = "123456";

const SESSION_COOKIE: &str = "user_session";
const NEW_FORM_TOKEN: &str = "new-form-tok";
const SUDO_TOKEN: &str = "sudo-tok";
const SUDO_PASSWORD_FORM_TOKEN: &str = "sudo-pw-tok";
const TOKENS_PREFIX: &str = "/settings/personal-access-tokens/";

/// When the fake asks for the password again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SudoMode {
    Off,
    /// The deletion POST answers with a confirmation form in place.
    Embedded,
    /// The new-token page redirects to a standalone confirmation page.
    Redirect,
}

#[derive(Debug, Clone)]
pub struct FakeToken {
    pub id: u64,
    pub name: String,
    pub created: String,
    pub expires: NaiveDate,
    pub last_used: String,
    pub permissions: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub form: Vec<(String, String)>,
    pub referer: Option<String>,
}

impl RecordedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self, name: &str) -> Vec<&str> {
        self.form
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

#[derive(Debug)]
pub struct FakeState {
    pub two_factor: bool,
    pub sudo: SudoMode,
    pub sudo_confirmed: bool,
    pub sessions: HashSet<String>,
    pub tokens: Vec<FakeToken>,
    pub repositories: Vec<(String, u64)>,
    pub requests: Vec<RecordedRequest>,
    pub login_posts: usize,
    next_session: u32,
    next_token_id: u64,
    awaiting_otp: Option<String>,
    flash: Option<String>,
    new_token_value: Option<String>,
}

impl FakeState {
    fn new() -> Self {
        let mut permissions = BTreeMap::new();
        permissions.insert("contents".to_string(), "write".to_string());
        Self {
            two_factor: false,
            sudo: SudoMode::Off,
            sudo_confirmed: false,
            sessions: HashSet::new(),
            tokens: vec![FakeToken {
                id: 123,
                name: "existing token".into(),
                created: "Thu, Mar 3 2022".into(),
                expires: date(2023, 3, 3),
                last_used: "never used".into(),
                permissions,
            }],
            repositories: vec![("tools".into(), 9001), ("dotfiles".into(), 9002)],
            requests: Vec::new(),
            login_posts: 0,
            next_session: 1,
            next_token_id: 1000,
            awaiting_otp: None,
            flash: None,
            new_token_value: None,
        }
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .cloned()
            .collect()
    }

    pub fn add_token(&mut self, name: &str, expires: NaiveDate) -> u64 {
        let id = self.next_token_id;
        self.next_token_id += 1;
        self.tokens.push(FakeToken {
            id,
            name: name.to_string(),
            created: "today".into(),
            expires,
            last_used: "never used".into(),
            permissions: BTreeMap::new(),
        });
        id
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

#[derive(Clone)]
pub struct FakeGithub {
    base: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeGithub {
    /// Mounts a fresh fake on `server`.
    pub async fn mount(server: &MockServer) -> Self {
        let fake = Self {
            base: server.uri(),
            state: Arc::new(Mutex::new(FakeState::new())),
        };
        Mock::given(any())
            .respond_with(fake.clone())
            .mount(server)
            .await;
        fake
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn absolute(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.base)
    }

    fn redirect(&self, path_and_query: &str) -> ResponseTemplate {
        ResponseTemplate::new(302).insert_header("Location", self.absolute(path_and_query))
    }

    fn redirect_with_return_to(&self, path: &str, return_to: &str) -> ResponseTemplate {
        let mut url = Url::parse(&self.absolute(path)).expect("valid fake url");
        url.query_pairs_mut().append_pair("return_to", return_to);
        ResponseTemplate::new(302).insert_header("Location", url.to_string())
    }

    fn requested_url(&self, request: &Request) -> String {
        match request.url.query() {
            Some(query) => self.absolute(&format!("{}?{query}", request.url.path())),
            None => self.absolute(request.url.path()),
        }
    }

    fn logged_in(state: &FakeState, request: &Request) -> bool {
        request
            .headers
            .get_all("cookie")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(name, value)| name == SESSION_COOKIE && state.sessions.contains(value))
    }

    fn route(
        &self,
        state: &mut FakeState,
        request: &Request,
        form: &[(String, String)],
    ) -> ResponseTemplate {
        let method = request.method.as_str();
        let path = request.url.path().to_string();
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };
        let logged_in = Self::logged_in(state, request);

        match (method, path.as_str()) {
            ("GET", "/login") if logged_in => self.redirect("/"),
            ("GET", "/login") => {
                let return_to = query_value(request, "return_to");
                html(&login_page(return_to.as_deref(), None))
            }
            ("POST", "/session") => self.login(
                state,
                field("login"),
                field("password"),
                field("return_to"),
            ),
            ("GET", "/sessions/two-factor/app") => html(&two_factor_page(None)),
            ("POST", "/sessions/two-factor") => self.two_factor(state, field("app_otp")),
            ("GET", "/") if logged_in => html("<html><body><h1>Dashboard</h1></body></html>"),
            ("GET", "/") => html("<html><body><p>Sign in to continue</p></body></html>"),
            _ if !logged_in => self.redirect_with_return_to("/login", &self.requested_url(request)),

            ("GET", "/sessions/sudo") => {
                let return_to =
                    query_value(request, "return_to").unwrap_or_else(|| self.absolute("/"));
                html(&multi_form_sudo_page(&return_to))
            }
            ("POST", "/sessions/sudo") => self.confirm_password(state, form),

            ("GET", "/settings/tokens") => html(&list_page(state)),
            ("GET", "/settings/personal-access-tokens/new") => {
                if state.sudo == SudoMode::Redirect && !state.sudo_confirmed {
                    let return_to = self.requested_url(request);
                    return self.redirect_with_return_to("/sessions/sudo", &return_to);
                }
                html(&new_token_page(None))
            }
            ("GET", "/settings/personal-access-tokens/suggestions") => {
                let owner = query_value(request, "target_name").unwrap_or_default();
                let q = query_value(request, "q").unwrap_or_default();
                html(&suggestions_page(state, &owner, &q))
            }
            ("POST", "/settings/personal-access-tokens") => self.create(state, form),
            ("GET", p) if p.starts_with(TOKENS_PREFIX) => {
                let rest = &p[TOKENS_PREFIX.len()..];
                match rest.split_once('/') {
                    Some((id, "expiration")) => match find_token(state, id) {
                        Some(token) => html(&format!(
                            "Expires on {}",
                            token.expires.format("%a, %b %-d %Y")
                        )),
                        None => ResponseTemplate::new(404),
                    },
                    Some(_) => ResponseTemplate::new(404),
                    None => match find_token(state, rest) {
                        Some(token) => html(&detail_page(token)),
                        None => ResponseTemplate::new(404),
                    },
                }
            }
            ("POST", p) if p.starts_with(TOKENS_PREFIX) => {
                let id = &p[TOKENS_PREFIX.len()..];
                if field("_method").as_deref() != Some("delete") {
                    return ResponseTemplate::new(422);
                }
                let Some(token) = find_token(state, id) else {
                    return ResponseTemplate::new(404);
                };
                if field("authenticity_token") != Some(format!("del-{}", token.id)) {
                    return ResponseTemplate::new(422);
                }
                if state.sudo == SudoMode::Embedded && !state.sudo_confirmed {
                    return html(&embedded_sudo_page(token.id));
                }
                let id = token.id;
                self.delete(state, id)
            }
            _ => ResponseTemplate::new(404),
        }
    }

    fn issue_session(&self, state: &mut FakeState, destination: &str) -> ResponseTemplate {
        let session = format!("s{}", state.next_session);
        state.next_session += 1;
        state.sessions.insert(session.clone());
        ResponseTemplate::new(302)
            .insert_header("Set-Cookie", format!("{SESSION_COOKIE}={session}; Path=/; HttpOnly"))
            .insert_header("Location", destination)
    }

    fn login(
        &self,
        state: &mut FakeState,
        login: Option<String>,
        password: Option<String>,
        return_to: Option<String>,
    ) -> ResponseTemplate {
        state.login_posts += 1;
        if login.as_deref() != Some(USERNAME) || password.as_deref() != Some(PASSWORD) {
            return html(&login_page(
                return_to.as_deref(),
                Some("Incorrect username or password."),
            ));
        }
        let destination = return_to
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.absolute("/"));
        if state.two_factor {
            state.awaiting_otp = Some(destination);
            return self.redirect("/sessions/two-factor/app");
        }
        self.issue_session(state, &destination)
    }

    fn two_factor(&self, state: &mut FakeState, otp: Option<String>) -> ResponseTemplate {
        let Some(destination) = state.awaiting_otp.clone() else {
            return self.redirect("/login");
        };
        if otp.as_deref() != Some(OTP) {
            return html(&two_factor_page(Some("Two-factor authentication failed.")));
        }
        state.awaiting_otp = None;
        self.issue_session(state, &destination)
    }

    fn confirm_password(
        &self,
        state: &mut FakeState,
        form: &[(String, String)],
    ) -> ResponseTemplate {
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        let token = field("authenticity_token");
        if token != Some(SUDO_TOKEN) && token != Some(SUDO_PASSWORD_FORM_TOKEN) {
            return ResponseTemplate::new(422);
        }
        if field("sudo_password") != Some(PASSWORD) {
            return html(&format!(
                r#"<html><body>{}<div id="sudo"><div><h1>Confirm access</h1></div>
                <form action="/sessions/sudo" method="post">
                  <input type="hidden" name="authenticity_token" value="{SUDO_TOKEN}">
                </form></div></body></html>"#,
                flash("Incorrect password.")
            ));
        }
        state.sudo_confirmed = true;
        if let Some(id) = field("pending_delete").and_then(|id| id.parse().ok()) {
            return self.delete(state, id);
        }
        match field("sudo_return_to") {
            Some(return_to) => ResponseTemplate::new(302).insert_header("Location", return_to),
            None => self.redirect("/"),
        }
    }

    fn create(&self, state: &mut FakeState, form: &[(String, String)]) -> ResponseTemplate {
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        if field("authenticity_token") != Some(NEW_FORM_TOKEN) {
            return ResponseTemplate::new(422);
        }
        let name = field("user_programmatic_access[name]").unwrap_or_default().to_string();
        if state.tokens.iter().any(|token| token.name == name) {
            return html(&new_token_page(Some("Name has already been taken")));
        }
        let Some(expires) = field("user_programmatic_access[custom_expires_at]")
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        else {
            return html(&new_token_page(Some("Expiration date is invalid")));
        };
        let id = state.add_token(&name, expires);
        let permissions = form
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .filter_map(|(key, value)| {
                let identifier = key
                    .strip_prefix("integration[default_permissions][")?
                    .strip_suffix(']')?;
                Some((identifier.to_string(), value.clone()))
            })
            .collect();
        if let Some(token) = state.tokens.iter_mut().find(|token| token.id == id) {
            token.permissions = permissions;
        }
        state.new_token_value = Some(format!("github_pat_{id}_fakevalue"));
        self.redirect("/settings/tokens?type=beta")
    }

    fn delete(&self, state: &mut FakeState, id: u64) -> ResponseTemplate {
        state.tokens.retain(|token| token.id != id);
        state.flash = Some("Deleted personal access token".into());
        self.redirect("/settings/tokens?type=beta")
    }
}

impl Respond for FakeGithub {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let form: Vec<(String, String)> = if request.method.as_str() == "POST" {
            url::form_urlencoded::parse(&request.body)
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect()
        } else {
            Vec::new()
        };
        let mut state = self.state();
        state.requests.push(RecordedRequest {
            method: request.method.as_str().to_string(),
            path: request.url.path().to_string(),
            query: request.url.query().map(str::to_string),
            form: form.clone(),
            referer: request
                .headers
                .get("referer")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        });
        self.route(&mut state, request, &form)
    }
}

fn query_value(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn find_token<'a>(state: &'a FakeState, id: &str) -> Option<&'a FakeToken> {
    let id: u64 = id.parse().ok()?;
    state.tokens.iter().find(|token| token.id == id)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn flash(message: &str) -> String {
    format!(r#"<div id="js-flash-container"><div class="flash flash-error">{message}</div></div>"#)
}

fn login_page(return_to: Option<&str>, error: Option<&str>) -> String {
    format!(
        r#"<html><body>{}
        <form action="/session" method="post">
          <input type="hidden" name="authenticity_token" value="login-tok">
          <input type="hidden" name="return_to" value="{}">
          <input type="text" name="login"><input type="password" name="password">
        </form></body></html>"#,
        error.map(flash).unwrap_or_default(),
        escape(return_to.unwrap_or_default())
    )
}

fn two_factor_page(error: Option<&str>) -> String {
    format!(
        r#"<html><body>{}
        <form action="/sessions/two-factor" method="post">
          <input type="hidden" name="authenticity_token" value="otp-tok">
          <input type="text" name="app_otp">
        </form></body></html>"#,
        error.map(flash).unwrap_or_default()
    )
}

fn embedded_sudo_page(pending_delete: u64) -> String {
    format!(
        r#"<html><body><div id="sudo"><div><h1>Confirm access</h1></div>
        <form action="/sessions/sudo" method="post">
          <input type="hidden" name="authenticity_token" value="{SUDO_TOKEN}">
          <input type="hidden" name="pending_delete" value="{pending_delete}">
          <input type="password" name="sudo_password">
        </form></div></body></html>"#
    )
}

fn multi_form_sudo_page(return_to: &str) -> String {
    let return_to = escape(return_to);
    format!(
        r#"<html><body><div id="sudo"><div><h1>Confirm access</h1></div>
        <form action="/sessions/sudo/webauthn" method="post">
          <input type="hidden" name="authenticity_token" value="webauthn-tok">
        </form>
        <form action="/sessions/sudo/app" method="post">
          <input type="hidden" name="authenticity_token" value="app-tok">
          <input type="text" name="otp">
        </form>
        <noscript>
          <form action="/sessions/sudo" method="post">
            <input type="hidden" name="authenticity_token" value="{SUDO_PASSWORD_FORM_TOKEN}">
            <input type="hidden" name="sudo_return_to" value="{return_to}">
            <input type="password" name="sudo_password">
          </form>
        </noscript></div></body></html>"#
    )
}

fn list_page(state: &mut FakeState) -> String {
    let mut out = String::from("<html><body>");
    if let Some(message) = state.flash.take() {
        let _ = write!(
            out,
            r#"<div id="js-flash-container"><div role="alert">{message}</div></div>"#
        );
    }
    if let Some(value) = state.new_token_value.take() {
        let _ = write!(out, r#"<input id="new-access-token" value="{value}">"#);
    }
    out.push_str(r#"<div class="listgroup">"#);
    for token in &state.tokens {
        let _ = write!(
            out,
            r#"<div class="access-token"><div class="listgroup-item">
              <div class="token-description"><strong><a href="/settings/personal-access-tokens/{id}">{name}</a></strong></div>
              <span class="last-used">{last_used}</span>
              <form action="/settings/personal-access-tokens/{id}" method="post">
                <input type="hidden" name="_method" value="delete">
                <input type="hidden" name="authenticity_token" value="del-{id}">
              </form></div></div>"#,
            id = token.id,
            name = escape(&token.name),
            last_used = token.last_used,
        );
    }
    out.push_str("</div></body></html>");
    out
}

fn permission_radios(out: &mut String, key: PermissionKey, checked: Option<&str>) {
    for value in key.allowed_values() {
        let raw = value.form_value();
        let mark = if checked == Some(raw) { " checked" } else { "" };
        let _ = write!(
            out,
            r#"<input type="radio" name="{}" value="{raw}"{mark}>"#,
            key.form_field()
        );
    }
}

fn detail_page(token: &FakeToken) -> String {
    let created = if token.created == "today" {
        "Created today".to_string()
    } else {
        format!("Created on {}", token.created)
    };
    let mut out = format!(
        r#"<html><body><h2><p>{}</p></h2>
        <div class="clearfix mb-1"><p class="float-left">{created}</p></div><ul>"#,
        escape(&token.name)
    );
    for key in PermissionKey::all() {
        let checked = token
            .permissions
            .get(key.identifier())
            .map_or("", String::as_str);
        out.push_str("<li>");
        permission_radios(&mut out, key, Some(checked));
        out.push_str("</li>");
    }
    out.push_str("</ul></body></html>");
    out
}

fn new_token_page(error: Option<&str>) -> String {
    let mut out = String::from("<html><body>");
    if let Some(message) = error {
        let _ = write!(out, r#"<div class="flash-error flash-full">{message}</div>"#);
    }
    let _ = write!(
        out,
        r#"<form id="new_user_programmatic_access" action="/settings/personal-access-tokens" method="post">
        <input type="hidden" name="authenticity_token" value="{NEW_FORM_TOKEN}">"#
    );
    let (account, repository): (Vec<_>, Vec<_>) = PermissionKey::all()
        .into_iter()
        .partition(|key| matches!(key, PermissionKey::Account(_)));
    for (label, group) in [("repository-permissions", repository), ("user-permissions", account)] {
        let _ = write!(out, r#"<ul aria-label="{label}">"#);
        for key in group {
            let _ = write!(
                out,
                r#"<li><div><div><strong>{name}</strong></div></div><div class="text-small">Access to {name}.</div>"#,
                name = key.full_name()
            );
            permission_radios(&mut out, key, None);
            out.push_str("</li>");
        }
        out.push_str("</ul>");
    }
    out.push_str("</form></body></html>");
    out
}

fn suggestions_page(state: &FakeState, owner: &str, q: &str) -> String {
    let mut out = String::new();
    for (name, id) in &state.repositories {
        if name.contains(q) {
            let _ = write!(
                out,
                r#"<button><input type="hidden" value="{id}"><span class="select-menu-item-text">{owner}/{name}</span></button>"#
            );
        }
    }
    out
}
