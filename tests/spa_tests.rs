// SPDX-License-Identifier: Apache-2.0
mod common;

use std::fs;

use actix_web::http::{header, StatusCode};
use actix_web::{test, App};

const INDEX: &str = "<html><body>spa shell</body></html>";

fn site() -> (tempfile::TempDir, tempfile::TempDir) {
    let spa = tempfile::tempdir().unwrap();
    fs::write(spa.path().join("index.html"), INDEX).unwrap();
    fs::write(spa.path().join("style.css"), "body { color: red; }").unwrap();

    let docs = tempfile::tempdir().unwrap();
    fs::write(docs.path().join("index.html"), "docs home").unwrap();
    fs::create_dir(docs.path().join("guide")).unwrap();
    fs::write(docs.path().join("guide/index.html"), "guide home").unwrap();

    (spa, docs)
}

fn toml(spa: &std::path::Path, docs: &std::path::Path) -> String {
    format!(
        r#"
[[routes]]
name = "docs"
from = "/docs/*"
to_folder = '{docs}'

[[routes]]
name = "app"
from = "/app/*"
toFolder = '{spa}'
isSPA = true

[[routes]]
name = "root"
from = "/*"
to_folder = '{spa}'
is_spa = true
cache_control_seconds = 600
"#,
        docs = docs.display(),
        spa = spa.display(),
    )
}

#[actix_web::test]
async fn test_spa_paths_serve_the_index() {
    let (spa, docs) = site();
    let gw = common::gateway(&toml(spa.path(), docs.path()));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    for path in ["/", "/about", "/app/dashboard", "/deep/link/here"] {
        let req = test::TestRequest::get().uri(path).to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK, "path {path}");
        let body = test::read_body(res).await;
        assert_eq!(body, INDEX.as_bytes(), "path {path}");
    }
}

#[actix_web::test]
async fn test_existing_assets_are_served_as_themselves() {
    let (spa, docs) = site();
    let gw = common::gateway(&toml(spa.path(), docs.path()));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/style.css").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let content_type = res.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/css"), "got {content_type}");
    assert_eq!(res.headers().get(header::CACHE_CONTROL).unwrap(), "max-age=600");
    assert_eq!(test::read_body(res).await, "body { color: red; }".as_bytes());
}

#[actix_web::test]
async fn test_non_spa_folder_returns_404_for_missing_paths() {
    let (spa, docs) = site();
    let gw = common::gateway(&toml(spa.path(), docs.path()));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/docs/missing.html").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get().uri("/docs/").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(test::read_body(res).await, "docs home".as_bytes());
}

#[actix_web::test]
async fn test_directory_without_slash_redirects() {
    let (spa, docs) = site();
    let gw = common::gateway(&toml(spa.path(), docs.path()));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/docs/guide").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(common::location(&res), "/docs/guide/");

    let req = test::TestRequest::get().uri("/docs/guide/").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(test::read_body(res).await, "guide home".as_bytes());
}

#[actix_web::test]
async fn test_parent_traversal_is_rejected() {
    let (spa, docs) = site();
    let gw = common::gateway(&toml(spa.path(), docs.path()));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/docs/%2e%2e/secret").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_unmatched_path_is_404() {
    let (_spa, docs) = site();
    let gw = common::gateway(&format!(
        "[[routes]]\nname = \"docs\"\nfrom = \"/docs/*\"\nto_folder = '{}'\n",
        docs.path().display()
    ));
    let app = test::init_service(App::new().configure(|c| gw.configure(c))).await;

    let req = test::TestRequest::get().uri("/elsewhere").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
