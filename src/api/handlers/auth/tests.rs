//! End-to-end flows through the full router with in-memory backends.

use super::{AuthConfig, AuthState};
use crate::{
    api::app,
    cache::MemoryCache,
    mail::{EmailMessage, Mailer, RecordingEmailSender},
    store::{MemoryUserStore, User, UserStore},
};
use axum::{
    Router,
    body::Body,
    http::{
        Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    },
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tower::ServiceExt;

const FORM: &str = "application/x-www-form-urlencoded";
const MULTIPART_BOUNDARY: &str = "portico-boundary";
const INCORRECT_LOGIN: &str = "Incorrect username or password.";

struct Site {
    cache: Arc<MemoryCache>,
    users: Arc<MemoryUserStore>,
    outbox: Arc<RecordingEmailSender>,
    app: Router,
}

impl Site {
    fn new() -> Self {
        Self::with_config(
            AuthConfig::new("https://members.example.com".to_string())
                .with_admin_email(Some("admin@example.com".to_string())),
        )
    }

    fn with_config(config: AuthConfig) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let users = Arc::new(MemoryUserStore::new());
        let outbox = Arc::new(RecordingEmailSender::new());
        let mailer = Mailer::new(outbox.clone(), "no-reply@example.com");
        let state = Arc::new(AuthState::new(config, cache.clone(), users.clone(), mailer));
        Self {
            cache,
            users,
            outbox,
            app: app(state),
        }
    }

    fn browser(&self) -> Browser {
        Browser {
            app: self.app.clone(),
            cookies: BTreeMap::new(),
        }
    }

    async fn member(&self, username: &str, password: &str) -> User {
        self.users
            .create(username, &format!("{username}@example.com"), password)
            .await
            .expect("create member")
    }

    async fn admin(&self, username: &str, password: &str) -> User {
        let mut user = self.member(username, password).await;
        user.is_admin = true;
        self.users.save(&user).await.expect("promote");
        user
    }

    fn tokens(&self, prefix: &str) -> Vec<String> {
        self.cache
            .keys(&format!("{prefix}/"))
            .into_iter()
            .filter_map(|key| key.split_once('/').map(|(_, token)| token.to_string()))
            .collect()
    }

    async fn wait_for_mail(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..100 {
            let sent = self.outbox.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.outbox.sent()
    }
}

struct Browser {
    app: Router,
    cookies: BTreeMap<String, String>,
}

impl Browser {
    async fn send(&mut self, mut request: Request<Body>) -> Response {
        if !self.cookies.is_empty() {
            let jar = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request
                .headers_mut()
                .insert(COOKIE, jar.parse().expect("cookie header"));
        }

        let response = self.app.clone().oneshot(request).await.expect("response");
        for header in response.headers().get_all(SET_COOKIE) {
            let header = header.to_str().expect("ascii cookie");
            let pair = header.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }
        response
    }

    async fn get(&mut self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).expect("request"))
            .await
    }

    async fn page(&mut self, uri: &str) -> Value {
        let response = self.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK, "GET {uri}");
        json_body(response).await
    }

    /// Visit a page so the browser holds a CSRF cookie.
    async fn visit(&mut self) {
        self.get("/v1/version").await;
    }

    fn csrf(&self) -> String {
        self.cookies.get("xsrf_token").cloned().unwrap_or_default()
    }

    async fn post_raw(&mut self, uri: &str, content_type: &str, body: String) -> Response {
        self.send(
            Request::post(uri)
                .header(CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .expect("request"),
        )
        .await
    }

    async fn post(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
        if !self.cookies.contains_key("xsrf_token") {
            self.visit().await;
        }
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .append_pair("_csrf", &self.csrf())
            .finish();
        self.post_raw(uri, FORM, body).await
    }

    /// Flash messages and errors waiting for the next page view.
    async fn messages(&mut self) -> (Vec<String>, Vec<String>) {
        let page = self.page("/").await;
        (strings(&page["flashes"]), strings(&page["errors"]))
    }

    async fn whoami(&mut self) -> Value {
        let response = self.get("/v1/users/me").await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    async fn login(&mut self, username: &str, password: &str) -> Response {
        self.post("/login", &[("username", username), ("password", password)])
            .await
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

// CSRF

#[tokio::test]
async fn csrf_cookie_is_issued_on_first_visit() {
    let site = Site::new();
    let mut browser = site.browser();
    let page = browser.page("/").await;

    let token = browser.csrf();
    assert!(!token.is_empty());
    assert_eq!(page["csrf_token"].as_str(), Some(token.as_str()));
    // Anonymous sessions are only stored once they hold something.
    assert!(!browser.cookies.contains_key("session_id"));
}

#[tokio::test]
async fn csrf_rejects_post_without_cookie() {
    let site = Site::new();
    let mut browser = site.browser();
    let response = browser
        .post_raw(
            "/login",
            FORM,
            "username=alice&password=x&_csrf=guess".to_string(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn csrf_rejects_mismatched_token() {
    let site = Site::new();
    let mut browser = site.browser();
    browser.visit().await;

    let response = browser
        .post_raw(
            "/login",
            FORM,
            "username=alice&password=x&_csrf=not-the-token".to_string(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = browser
        .post_raw("/login", FORM, "username=alice&password=x".to_string())
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn csrf_accepts_matching_token() {
    let site = Site::new();
    site.member("alice", "correct horse").await;
    let mut browser = site.browser();

    let response = browser.login("alice", "correct horse").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/me");
}

#[tokio::test]
async fn csrf_skips_json_bodies() {
    let site = Site::new();
    let mut browser = site.browser();

    // No cookie and no token: the guard lets it through to the handler,
    // which then refuses the content type itself.
    let response = browser
        .post_raw("/login", "application/json", "{}".to_string())
        .await;
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

fn multipart_body(fields: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{MULTIPART_BOUNDARY}--\r\n"));
    body
}

#[tokio::test]
async fn csrf_accepts_multipart_with_matching_token() {
    let site = Site::new();
    let mut browser = site.browser();
    browser.visit().await;
    let csrf = browser.csrf();

    // The guard passes the body through; the urlencoded-only handler then
    // refuses the content type itself.
    let response = browser
        .post_raw(
            "/contact",
            &format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            multipart_body(&[("message", "hello"), ("_csrf", &csrf)]),
        )
        .await;
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn csrf_rejects_multipart_with_mismatched_token() {
    let site = Site::new();
    let mut browser = site.browser();
    browser.visit().await;
    let content_type = format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}");

    let response = browser
        .post_raw(
            "/contact",
            &content_type,
            multipart_body(&[("message", "hello"), ("_csrf", "not-the-token")]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = browser
        .post_raw("/contact", &content_type, multipart_body(&[("message", "hello")]))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_forms_are_refused() {
    let site = Site::with_config(
        AuthConfig::new("https://members.example.com".to_string()).with_max_form_bytes(64),
    );
    let mut browser = site.browser();
    browser.visit().await;
    let filler = "x".repeat(256);
    let response = browser
        .post("/contact", &[("message", filler.as_str())])
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// Login

#[tokio::test]
async fn login_lockout_scenario() {
    let site = Site::new();
    site.member("alice", "correct horse").await;
    let mut browser = site.browser();

    for _ in 0..3 {
        let response = browser.login("alice", "wrong").await;
        assert_eq!(location(&response), "/login");
        let (_, errors) = browser.messages().await;
        assert_eq!(errors, vec![INCORRECT_LOGIN.to_string()]);
    }

    browser.login("alice", "wrong").await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Please wait 30 seconds"), "{errors:?}");
    assert!(errors[0].contains("6 more attempt"), "{errors:?}");

    // The cooldown only gates failed attempts.
    let response = browser.login("alice", "correct horse").await;
    assert_eq!(location(&response), "/me");
    assert_eq!(browser.whoami().await["username"], "alice");
    assert!(site.cache.keys("rate-limit/login/").is_empty());

    browser.get("/logout").await;
    browser.login("alice", "wrong").await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors, vec![INCORRECT_LOGIN.to_string()]);
}

#[tokio::test]
async fn unknown_users_get_the_generic_message() {
    let site = Site::new();
    let mut browser = site.browser();
    browser.login("nobody", "whatever").await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors, vec![INCORRECT_LOGIN.to_string()]);
}

#[tokio::test]
async fn login_rotates_the_session_id() {
    let site = Site::new();
    site.member("alice", "correct horse").await;
    let mut browser = site.browser();
    browser.login("alice", "wrong").await;
    let anonymous = browser.cookies.get("session_id").cloned().expect("session");
    assert_eq!(site.cache.keys(&format!("session/{anonymous}")).len(), 1);

    browser.login("alice", "correct horse").await;
    let member = browser.cookies.get("session_id").cloned().expect("session");
    assert_ne!(anonymous, member);
    assert_eq!(site.cache.keys(&format!("session/{anonymous}")), Vec::<String>::new());
}

#[tokio::test]
async fn login_honours_local_next_only() {
    let site = Site::new();
    site.member("alice", "correct horse").await;

    let mut browser = site.browser();
    let response = browser
        .post(
            "/login",
            &[
                ("username", "alice"),
                ("password", "correct horse"),
                ("next", "/settings"),
            ],
        )
        .await;
    assert_eq!(location(&response), "/settings");

    let mut browser = site.browser();
    let response = browser
        .post(
            "/login",
            &[
                ("username", "alice"),
                ("password", "correct horse"),
                ("next", "//evil.example.com"),
            ],
        )
        .await;
    assert_eq!(location(&response), "/me");
}

#[tokio::test]
async fn banned_members_cannot_log_in() {
    let site = Site::new();
    let mut user = site.member("mallory", "secret").await;
    user.status = crate::store::UserStatus::Banned;
    site.users.save(&user).await.expect("ban");

    let mut browser = site.browser();
    let response = browser.login("mallory", "secret").await;
    assert_eq!(location(&response), "/login");
    let (_, errors) = browser.messages().await;
    assert!(errors[0].contains("has been banned"), "{errors:?}");
    assert_eq!(browser.whoami().await["success"], false);
}

#[tokio::test]
async fn logout_clears_the_member() {
    let site = Site::new();
    site.member("alice", "correct horse").await;
    let mut browser = site.browser();
    browser.login("alice", "correct horse").await;
    assert_eq!(browser.whoami().await["success"], true);

    let response = browser.get("/logout").await;
    assert_eq!(location(&response), "/");
    assert_eq!(browser.whoami().await["success"], false);
}

// Guards

#[tokio::test]
async fn members_area_requires_login() {
    let site = Site::new();
    let mut browser = site.browser();
    let response = browser.get("/settings").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/login?next=%2Fsettings");

    site.member("alice", "correct horse").await;
    browser.login("alice", "correct horse").await;
    let page = browser.page("/me").await;
    assert_eq!(page["template"], "account/dashboard.html");
    assert_eq!(page["vars"]["username"], "alice");
}

#[tokio::test]
async fn disabled_members_are_logged_out_by_the_guard() {
    let site = Site::new();
    let mut user = site.member("alice", "correct horse").await;
    let mut browser = site.browser();
    browser.login("alice", "correct horse").await;

    user.status = crate::store::UserStatus::Disabled;
    site.users.save(&user).await.expect("disable");

    let response = browser.get("/me").await;
    assert_eq!(location(&response), "/");
    let (_, errors) = browser.messages().await;
    assert!(errors[0].contains("has been disabled"), "{errors:?}");
    assert_eq!(browser.whoami().await["success"], false);
}

#[tokio::test]
async fn admin_routes_refuse_members() {
    let site = Site::new();
    let target = site.member("bob", "hunter22").await;
    site.member("alice", "correct horse").await;
    let mut browser = site.browser();
    browser.login("alice", "correct horse").await;

    let user_id = target.id.to_string();
    let response = browser
        .post(
            "/admin/impersonate",
            &[("user_id", user_id.as_str()), ("reason", "support")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(browser.whoami().await["username"], "alice");
}

#[tokio::test]
async fn admins_can_impersonate() {
    let site = Site::new();
    let target = site.member("bob", "hunter22").await;
    site.admin("root", "letmein").await;
    let mut browser = site.browser();
    browser.login("root", "letmein").await;
    let before = browser.cookies.get("session_id").cloned();

    let user_id = target.id.to_string();
    let response = browser
        .post(
            "/admin/impersonate",
            &[("user_id", user_id.as_str()), ("reason", "ticket 42")],
        )
        .await;
    assert_eq!(location(&response), "/me");
    assert_ne!(browser.cookies.get("session_id").cloned(), before);

    let page = browser.page("/").await;
    assert_eq!(page["current_user"], "bob");
    assert_eq!(page["impersonating"], true);

    let sent = site.wait_for_mail(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_email, "admin@example.com");
    assert_eq!(sent[0].subject, "Admin 'user impersonate' has been used");
}

#[tokio::test]
async fn impersonation_requires_a_reason_and_a_user() {
    let site = Site::new();
    site.admin("root", "letmein").await;
    let mut browser = site.browser();
    browser.login("root", "letmein").await;

    browser
        .post("/admin/impersonate", &[("user_id", "abc"), ("reason", "x")])
        .await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors, vec!["Invalid or missing user_id parameter.".to_string()]);

    browser
        .post("/admin/impersonate", &[("user_id", "1"), ("reason", " ")])
        .await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors, vec!["A reason is required.".to_string()]);

    browser
        .post("/admin/impersonate", &[("user_id", "999"), ("reason", "x")])
        .await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors, vec!["Didn't find user ID in database.".to_string()]);
}

// Signup

#[tokio::test]
async fn signup_verifies_email_then_creates_account() {
    let site = Site::new();
    let mut browser = site.browser();

    let response = browser
        .post("/signup", &[("email", "New@Example.com"), ("confirm", "true")])
        .await;
    assert_eq!(location(&response), "/signup");
    let (flashes, _) = browser.messages().await;
    assert!(flashes[0].contains("new@example.com"), "{flashes:?}");

    let tokens = site.tokens("signup-token");
    assert_eq!(tokens.len(), 1);
    let token = tokens[0].clone();

    let sent = site.wait_for_mail(1).await;
    assert_eq!(sent[0].to_email, "new@example.com");
    assert!(
        sent[0].data["url"]
            .as_str()
            .is_some_and(|url| url.ends_with(&format!("/signup?token={token}")))
    );

    let page = browser.page(&format!("/signup?token={token}")).await;
    assert_eq!(page["vars"]["email"], "new@example.com");

    let response = browser
        .post(
            "/signup",
            &[
                ("token", token.as_str()),
                ("email", "new@example.com"),
                ("confirm", "true"),
                ("username", "newbie"),
                ("password", "s3cret"),
                ("password2", "s3cret"),
            ],
        )
        .await;
    assert_eq!(location(&response), "/me");
    assert_eq!(browser.whoami().await["username"], "newbie");
    assert!(site.tokens("signup-token").is_empty());
}

#[tokio::test]
async fn signup_refuses_a_swapped_email() {
    let site = Site::new();
    let mut browser = site.browser();
    browser
        .post("/signup", &[("email", "first@example.com"), ("confirm", "true")])
        .await;
    let token = site.tokens("signup-token").remove(0);

    browser
        .post(
            "/signup",
            &[
                ("token", token.as_str()),
                ("email", "second@example.com"),
                ("confirm", "true"),
                ("username", "newbie"),
                ("password", "s3cret"),
                ("password2", "s3cret"),
            ],
        )
        .await;
    let (_, errors) = browser.messages().await;
    assert_eq!(
        errors,
        vec!["This email address is not verified. Please start over from the beginning."
            .to_string()]
    );
    assert_eq!(site.tokens("signup-token"), vec![token]);
}

#[tokio::test]
async fn signup_checks_the_form() {
    let site = Site::with_config(
        AuthConfig::new("https://members.example.com".to_string())
            .with_skip_email_verification(true),
    );
    site.member("taken", "whatever").await;
    let mut browser = site.browser();

    let cases: [(&[(&str, &str)], &str); 5] = [
        (
            &[("email", "a@example.com"), ("confirm", "true"), ("username", "admin")],
            "That username is reserved, please choose a different username.",
        ),
        (
            &[("email", "not-an-email"), ("confirm", "true"), ("username", "fresh")],
            "The email address you entered is not valid.",
        ),
        (
            &[("email", "a@example.com"), ("username", "fresh")],
            "Confirm that you have read the rules.",
        ),
        (
            &[("email", "taken@example.com"), ("confirm", "true"), ("username", "fresh")],
            "There is already an account with that e-mail address.",
        ),
        (
            &[
                ("email", "a@example.com"),
                ("confirm", "true"),
                ("username", "taken"),
                ("password", "abc"),
                ("password2", "abc"),
            ],
            "That username already exists. Please try a different username.",
        ),
    ];

    for (fields, expected) in cases {
        browser.post("/signup", fields).await;
        let (_, errors) = browser.messages().await;
        assert_eq!(errors, vec![expected.to_string()], "{fields:?}");
    }

    browser
        .post(
            "/signup",
            &[
                ("email", "a@example.com"),
                ("confirm", "true"),
                ("username", "x"),
                ("password", "abc"),
                ("password2", "abd"),
            ],
        )
        .await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0], "Your passwords do not match.");
}

#[tokio::test]
async fn signup_without_verification_logs_in_directly() {
    let site = Site::with_config(
        AuthConfig::new("https://members.example.com".to_string())
            .with_skip_email_verification(true),
    );
    let mut browser = site.browser();
    let response = browser
        .post(
            "/signup",
            &[
                ("email", "direct@example.com"),
                ("confirm", "true"),
                ("username", "direct"),
                ("password", "s3cret"),
                ("password2", "s3cret"),
            ],
        )
        .await;
    assert_eq!(location(&response), "/me");
    assert!(site.tokens("signup-token").is_empty());
    assert_eq!(browser.whoami().await["username"], "direct");
}

// Password reset

#[tokio::test]
async fn password_reset_scenario() {
    let site = Site::new();
    let user = site.member("user", "old password").await;
    let mut browser = site.browser();

    browser
        .post("/forgot-password", &[("username", "user@example.com")])
        .await;
    let (flashes, _) = browser.messages().await;
    assert!(flashes[0].starts_with("If that username or email existed"));
    let token = site.tokens("reset-password").remove(0);

    // Without the token the submission is treated as a new request and refused.
    browser
        .post(
            "/forgot-password",
            &[("password", "new password"), ("password2", "new password")],
        )
        .await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors, vec!["Username or email address is required.".to_string()]);
    assert_eq!(browser.whoami().await["success"], false);

    let response = browser
        .post(
            "/forgot-password",
            &[
                ("token", token.as_str()),
                ("password", "new password"),
                ("password2", "new password"),
            ],
        )
        .await;
    assert_eq!(location(&response), "/me");
    let me = browser.whoami().await;
    assert_eq!(me["userId"], user.id);

    let saved = site.users.get_by_id(user.id).await.expect("user");
    assert!(site.users.check_password(&saved, "new password").await.is_ok());

    // Replaying the same link fails.
    let mut other = site.browser();
    other
        .post(
            "/forgot-password",
            &[
                ("token", token.as_str()),
                ("password", "another"),
                ("password2", "another"),
            ],
        )
        .await;
    let (_, errors) = other.messages().await;
    assert_eq!(
        errors,
        vec!["Invalid password reset token. Please try again from the beginning.".to_string()]
    );
    let saved = site.users.get_by_id(user.id).await.expect("user");
    assert!(site.users.check_password(&saved, "new password").await.is_ok());
}

#[tokio::test]
async fn password_reset_does_not_reveal_accounts() {
    let site = Site::new();
    site.member("user", "old password").await;

    let mut browser = site.browser();
    browser
        .post("/forgot-password", &[("username", "user")])
        .await;
    let (hit, _) = browser.messages().await;
    browser
        .post("/forgot-password", &[("username", "ghost@example.com")])
        .await;
    let (miss, _) = browser.messages().await;

    assert_eq!(hit, miss);
    assert_eq!(site.tokens("reset-password").len(), 1);
}

#[tokio::test]
async fn password_reset_needs_matching_passwords() {
    let site = Site::new();
    site.member("user", "old password").await;
    let mut browser = site.browser();
    browser.post("/forgot-password", &[("username", "user")]).await;
    let token = site.tokens("reset-password").remove(0);

    let response = browser
        .post(
            "/forgot-password",
            &[
                ("token", token.as_str()),
                ("password", "one"),
                ("password2", "two"),
            ],
        )
        .await;
    assert_eq!(location(&response), format!("/forgot-password?token={token}"));
    // A failed attempt leaves the link usable.
    assert_eq!(site.tokens("reset-password"), vec![token]);
}

// Settings

async fn request_email_change(site: &Site, browser: &mut Browser, password: &str, email: &str) -> String {
    let before = site.tokens("change-email");
    browser
        .post(
            "/settings",
            &[
                ("intent", "settings"),
                ("old_password", password),
                ("change_email", email),
            ],
        )
        .await;
    site.tokens("change-email")
        .into_iter()
        .find(|token| !before.contains(token))
        .expect("change-email token")
}

#[tokio::test]
async fn email_change_is_confirmed_by_link() {
    let site = Site::new();
    let user = site.member("alice", "correct horse").await;
    let mut browser = site.browser();
    browser.login("alice", "correct horse").await;

    let token = request_email_change(&site, &mut browser, "correct horse", "alice@new.example.com").await;
    let (flashes, _) = browser.messages().await;
    assert!(flashes.iter().any(|f| f.contains("alice@new.example.com")), "{flashes:?}");

    let response = browser
        .get(&format!("/settings/confirm-email?token={token}"))
        .await;
    assert_eq!(location(&response), "/");
    let saved = site.users.get_by_id(user.id).await.expect("user");
    assert_eq!(saved.email, "alice@new.example.com");

    let (flashes, _) = browser.messages().await;
    assert_eq!(
        flashes,
        vec!["Your email address has been confirmed and updated.".to_string()]
    );
    assert!(site.tokens("change-email").is_empty());
}

#[tokio::test]
async fn email_change_race_binds_the_address_once() {
    let site = Site::new();
    let alice = site.member("alice", "alice pw").await;
    let bob = site.member("bob", "bob pw").await;

    let mut alice_browser = site.browser();
    alice_browser.login("alice", "alice pw").await;
    let mut bob_browser = site.browser();
    bob_browser.login("bob", "bob pw").await;

    let alice_token =
        request_email_change(&site, &mut alice_browser, "alice pw", "shared@example.com").await;
    let bob_token =
        request_email_change(&site, &mut bob_browser, "bob pw", "shared@example.com").await;

    alice_browser
        .get(&format!("/settings/confirm-email?token={alice_token}"))
        .await;
    bob_browser
        .get(&format!("/settings/confirm-email?token={bob_token}"))
        .await;

    let (_, errors) = bob_browser.messages().await;
    assert_eq!(
        errors,
        vec!["Couldn't update your email address: it is already in use by another member."
            .to_string()]
    );
    assert_eq!(
        site.users.get_by_id(alice.id).await.expect("alice").email,
        "shared@example.com"
    );
    assert_eq!(
        site.users.get_by_id(bob.id).await.expect("bob").email,
        "bob@example.com"
    );
}

#[tokio::test]
async fn settings_require_the_current_password() {
    let site = Site::new();
    site.member("alice", "correct horse").await;
    let mut browser = site.browser();
    browser.login("alice", "correct horse").await;

    browser
        .post(
            "/settings",
            &[
                ("intent", "settings"),
                ("old_password", "wrong"),
                ("new_password", "new"),
                ("new_password2", "new"),
            ],
        )
        .await;
    let (_, errors) = browser.messages().await;
    assert!(errors[0].contains("'current password' you entered was incorrect"));

    browser
        .post("/settings", &[("intent", "bogus")])
        .await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors, vec!["Unknown POST intent value. Please try again.".to_string()]);
}

#[tokio::test]
async fn settings_change_the_password() {
    let site = Site::new();
    let user = site.member("alice", "correct horse").await;
    let mut browser = site.browser();
    browser.login("alice", "correct horse").await;
    browser.messages().await;

    browser
        .post(
            "/settings",
            &[
                ("intent", "settings"),
                ("old_password", "correct horse"),
                ("new_password", "battery staple"),
                ("new_password2", "battery staple"),
            ],
        )
        .await;
    let (flashes, _) = browser.messages().await;
    assert_eq!(flashes, vec!["Your password has been updated.".to_string()]);

    let saved = site.users.get_by_id(user.id).await.expect("user");
    assert!(site.users.check_password(&saved, "battery staple").await.is_ok());
}

#[tokio::test]
async fn confirm_email_rejects_bad_tokens() {
    let site = Site::new();
    let mut browser = site.browser();
    let response = browser.get("/settings/confirm-email?token=bogus").await;
    assert_eq!(location(&response), "/");
    let (_, errors) = browser.messages().await;
    assert_eq!(
        errors,
        vec!["Invalid token. Please try again to change your email address.".to_string()]
    );
}

// Contact

#[tokio::test]
async fn contact_form_is_throttled_for_visitors() {
    let site = Site::new();
    let mut browser = site.browser();

    browser
        .post("/contact", &[("subject", "hi"), ("message", "first")])
        .await;
    let (flashes, errors) = browser.messages().await;
    assert!(flashes[0].starts_with("Thank you for your feedback!"));
    assert!(errors.is_empty());

    // The second message counts, is delivered, and starts the cooldown.
    browser
        .post("/contact", &[("subject", "hi"), ("message", "second")])
        .await;
    let (flashes, errors) = browser.messages().await;
    assert_eq!(flashes.len(), 1);
    assert!(errors[0].contains("Please wait 2 minutes"), "{errors:?}");

    // The third is refused outright.
    browser
        .post("/contact", &[("subject", "hi"), ("message", "third")])
        .await;
    let (flashes, errors) = browser.messages().await;
    assert!(flashes.is_empty());
    assert!(errors[0].contains("You are doing that too often"), "{errors:?}");

    let sent = site.wait_for_mail(2).await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.to_email == "admin@example.com"));
    assert_eq!(site.cache.keys("rate-limit/contact/ip:unknown").len(), 1);
}

#[tokio::test]
async fn contact_form_needs_a_message() {
    let site = Site::new();
    let mut browser = site.browser();
    browser.post("/contact", &[("subject", "hi")]).await;
    let (_, errors) = browser.messages().await;
    assert_eq!(errors, vec!["A message is required.".to_string()]);
}
