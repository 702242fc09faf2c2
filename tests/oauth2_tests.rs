// SPDX-License-Identifier: Apache-2.0
mod common;

use std::collections::HashMap;
use std::net::SocketAddr;

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App, HttpRequest, HttpResponse};
use serde_json::json;
use wardgate::auth::oauth2::{REDIRECT_COOKIE, STATE_COOKIE};

async fn token(form: web::Form<HashMap<String, String>>) -> HttpResponse {
    if form.get("grant_type").map(String::as_str) != Some("authorization_code")
        || form.get("code").map(String::as_str) != Some("abc")
        || form.get("client_id").map(String::as_str) != Some("client-1")
    {
        return HttpResponse::BadRequest().json(json!({ "error": "invalid_grant" }));
    }
    HttpResponse::Ok().json(json!({ "access_token": "tok", "token_type": "bearer" }))
}

fn bearer_ok(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer tok")
}

async fn user(req: HttpRequest) -> HttpResponse {
    if !bearer_ok(&req) {
        return HttpResponse::Unauthorized().finish();
    }
    HttpResponse::Ok().json(json!({
        "id": 4242,
        "login": "octo",
        "email": null,
        "name": "Octo Cat",
        "avatar_url": "https://avatars.example/octo.png"
    }))
}

async fn emails(req: HttpRequest) -> HttpResponse {
    if !bearer_ok(&req) {
        return HttpResponse::Unauthorized().finish();
    }
    HttpResponse::Ok().json(json!([
        { "email": "old@example.com", "primary": false, "verified": true },
        { "email": "octo@example.com", "primary": true, "verified": true }
    ]))
}

fn fake_github(cfg: &mut web::ServiceConfig) {
    cfg.route("/token", web::post().to(token))
        .route("/user", web::get().to(user))
        .route("/user/emails", web::get().to(emails));
}

fn toml(idp: SocketAddr, extra: &str) -> String {
    format!(
        r#"
{extra}

[auth.oauth2.github]
client_id = "client-1"
client_secret = "secret-1"
auth_url = "http://{idp}/authorize"
token_url = "http://{idp}/token"
userinfo_url = "http://{idp}/user"
emails_url = "http://{idp}/user/emails"
"#
    )
}

#[actix_web::test]
async fn test_github_login_creates_session() {
    let idp = common::spawn_server(fake_github);
    let gw = common::gateway(&toml(idp, ""));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get()
        .uri("/gateway/auth/github/login?redirect=/reports")
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = common::location(&res);
    assert!(location.starts_with(&format!("http://{idp}/authorize?")), "got {location}");
    assert_eq!(common::location_param(&location, "client_id").as_deref(), Some("client-1"));
    assert_eq!(common::location_param(&location, "response_type").as_deref(), Some("code"));
    assert_eq!(
        common::location_param(&location, "redirect_uri").as_deref(),
        Some("http://localhost:8080/gateway/auth/github/callback")
    );
    let state = common::location_param(&location, "state").expect("state parameter");
    let state_cookie = common::cookie(&res, STATE_COOKIE).expect("state cookie");
    let redirect_cookie = common::cookie(&res, REDIRECT_COOKIE).expect("redirect cookie");
    assert_eq!(state_cookie.value(), state);
    assert_eq!(state_cookie.http_only(), Some(true));

    let req = test::TestRequest::get()
        .uri(&format!("/gateway/auth/github/callback?code=abc&state={state}"))
        .cookie(state_cookie)
        .cookie(redirect_cookie)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(common::location(&res), "/reports");
    assert_eq!(common::cookie(&res, STATE_COOKIE).map(|c| c.value().to_owned()).as_deref(), Some(""));
    let session = common::session_cookie(&res).expect("session cookie");

    let req = test::TestRequest::get()
        .uri("/gateway/api/session")
        .cookie(session)
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["provider"], "github");
    assert_eq!(body["username"], "octo");
    assert_eq!(body["email"], "octo@example.com");
}

#[actix_web::test]
async fn test_returning_identity_reuses_the_user() {
    let idp = common::spawn_server(fake_github);
    let gw = common::gateway(&toml(idp, ""));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let mut user_ids = Vec::new();
    for _ in 0..2 {
        let req = test::TestRequest::get().uri("/gateway/auth/github/login").to_request();
        let res = test::call_service(&app, req).await;
        let state = common::location_param(&common::location(&res), "state").unwrap();
        let state_cookie = common::cookie(&res, STATE_COOKIE).unwrap();

        let req = test::TestRequest::get()
            .uri(&format!("/gateway/auth/github/callback?code=abc&state={state}"))
            .cookie(state_cookie)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(common::location(&res), "/");
        let session = common::session_cookie(&res).unwrap();

        let req = test::TestRequest::get()
            .uri("/gateway/api/session")
            .cookie(session)
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        user_ids.push(body["user_id"].as_str().unwrap().to_owned());
    }
    assert_eq!(user_ids[0], user_ids[1]);
}

#[actix_web::test]
async fn test_state_mismatch_is_rejected() {
    let idp = common::spawn_server(fake_github);
    let gw = common::gateway(&toml(idp, ""));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/gateway/auth/github/login").to_request();
    let res = test::call_service(&app, req).await;
    let state_cookie = common::cookie(&res, STATE_COOKIE).unwrap();

    let req = test::TestRequest::get()
        .uri("/gateway/auth/github/callback?code=abc&state=forged")
        .cookie(state_cookie)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(common::session_cookie(&res).is_none());

    // No state cookie at all.
    let req = test::TestRequest::get()
        .uri("/gateway/auth/github/callback?code=abc&state=anything")
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_denied_consent_is_rejected() {
    let idp = common::spawn_server(fake_github);
    let gw = common::gateway(&toml(idp, ""));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/gateway/auth/github/login").to_request();
    let res = test::call_service(&app, req).await;
    let state = common::location_param(&common::location(&res), "state").unwrap();
    let state_cookie = common::cookie(&res, STATE_COOKIE).unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/gateway/auth/github/callback?error=access_denied&state={state}"))
        .cookie(state_cookie)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(common::session_cookie(&res).is_none());
}

#[actix_web::test]
async fn test_email_owned_by_basic_user_conflicts() {
    let idp = common::spawn_server(fake_github);
    let gw = common::gateway(&toml(
        idp,
        r#"
[[auth.basic.users]]
username = "octo-local"
email = "octo@example.com"
password = "hunter22"
"#,
    ));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/gateway/auth/github/login").to_request();
    let res = test::call_service(&app, req).await;
    let state = common::location_param(&common::location(&res), "state").unwrap();
    let state_cookie = common::cookie(&res, STATE_COOKIE).unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/gateway/auth/github/callback?code=abc&state={state}"))
        .cookie(state_cookie)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert!(common::session_cookie(&res).is_none());
}

#[actix_web::test]
async fn test_failed_code_exchange_is_a_server_error() {
    let idp = common::spawn_server(fake_github);
    let gw = common::gateway(&toml(idp, ""));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/gateway/auth/github/login").to_request();
    let res = test::call_service(&app, req).await;
    let state = common::location_param(&common::location(&res), "state").unwrap();
    let state_cookie = common::cookie(&res, STATE_COOKIE).unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/gateway/auth/github/callback?code=wrong&state={state}"))
        .cookie(state_cookie)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[actix_web::test]
async fn test_login_page_links_to_provider() {
    let idp = common::spawn_server(fake_github);
    let gw = common::gateway(&toml(idp, ""));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get()
        .uri("/gateway/login?redirect=/reports")
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    let page = String::from_utf8(body.to_vec()).unwrap();
    assert!(page.contains("/gateway/auth/github/login?redirect=%2Freports"));
    assert!(page.contains("Continue with GitHub"));
}
