use cronohub::plugins::{github, gitlab};
use cronohub_core::contract::{PluginContext, SourcePlugin};
use httpmock::prelude::*;
use httpmock::MockServer;
use serde_json::{json, Value};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::tempdir;

fn repository(name: &str, fork: bool) -> Value {
    json!({ "name": name, "full_name": format!("me/{name}"), "fork": fork })
}

fn fetched_names(report: &cronohub_core::contract::FetchReport) -> Vec<String> {
    let mut names: Vec<String> = report.items.iter().map(|i| i.name.clone()).collect();
    names.sort();
    names
}

/// A full first page means another page is requested; a short page ends the
/// listing. Forks are dropped before the filter and never downloaded.
#[tokio::test]
#[serial]
async fn github_pages_until_short_page_and_skips_forks() {
    let server = MockServer::start_async().await;
    let full_page: Vec<Value> = (0..100)
        .map(|i| repository(&format!("repo-{i}"), i == 5))
        .collect();
    let page_one = server.mock(|when, then| {
        when.method(GET)
            .path("/user/repos")
            .query_param("type", "owner")
            .query_param("per_page", "100")
            .query_param("page", "1")
            .header("authorization", "Bearer t0ken");
        then.status(200).json_body(Value::Array(full_page));
    });
    let page_two = server.mock(|when, then| {
        when.method(GET).path("/user/repos").query_param("page", "2");
        then.status(200).json_body(json!([
            repository("repo-100", false),
            repository("fork-x", true),
        ]));
    });
    let page_three = server.mock(|when, then| {
        when.method(GET).path("/user/repos").query_param("page", "3");
        then.status(200).json_body(json!([]));
    });
    let zip_three = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/me/repo-3/zipball")
            .header("authorization", "Bearer t0ken");
        then.status(200).body("three");
    });
    let zip_hundred = server.mock(|when, then| {
        when.method(GET).path("/repos/me/repo-100/zipball");
        then.status(200).body("hundred");
    });
    let zip_fork = server.mock(|when, then| {
        when.method(GET).path("/repos/me/fork-x/zipball");
        then.status(200).body("fork");
    });
    let zip_five = server.mock(|when, then| {
        when.method(GET).path("/repos/me/repo-5/zipball");
        then.status(200).body("five");
    });

    let config = tempdir().unwrap();
    fs::write(
        config.path().join(".repo_list"),
        "repo-3\nrepo-5\nrepo-100\nfork-x\n",
    )
    .unwrap();
    let context = PluginContext::new(config.path(), config.path().join("target"));
    env::set_var(github::TOKEN_ENV, "t0ken");
    env::set_var(github::API_ENV, server.base_url());
    let source = github::GithubSource::new(&context);
    let report = source.fetch().await;
    env::remove_var(github::TOKEN_ENV);
    env::remove_var(github::API_ENV);

    let report = report.unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(fetched_names(&report), vec!["repo-100", "repo-3"]);
    for item in &report.items {
        assert!(item.location.ends_with(".zip"));
        assert!(item.local_path().starts_with(config.path().join("target")));
    }
    page_one.assert_hits(1);
    page_two.assert_hits(1);
    page_three.assert_hits(0);
    zip_three.assert_hits(1);
    zip_hundred.assert_hits(1);
    zip_fork.assert_hits(0);
    zip_five.assert_hits(0);
}

#[tokio::test]
#[serial]
async fn github_listing_error_fails_the_fetch() {
    let server = MockServer::start_async().await;
    let listing = server.mock(|when, then| {
        when.method(GET).path("/user/repos");
        then.status(401).body("Bad credentials");
    });

    let config = tempdir().unwrap();
    let context = PluginContext::new(config.path(), config.path().join("target"));
    env::set_var(github::TOKEN_ENV, "expired");
    env::set_var(github::API_ENV, server.base_url());
    let report = github::GithubSource::new(&context).fetch().await;
    env::remove_var(github::TOKEN_ENV);
    env::remove_var(github::API_ENV);

    let err = report.unwrap_err();
    assert!(err.to_string().contains("401"), "{err}");
    listing.assert_hits(1);
}

#[tokio::test]
#[serial]
async fn gitlab_downloads_owned_projects_with_private_token() {
    let server = MockServer::start_async().await;
    let listing = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v4/projects")
            .query_param("owned", "true")
            .query_param("page", "1")
            .header("private-token", "glpat");
        then.status(200).json_body(json!([
            { "id": 7, "path": "alpha" },
            { "id": 9, "path": "beta" },
        ]));
    });
    let alpha = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v4/projects/7/repository/archive.zip")
            .header("private-token", "glpat");
        then.status(200).body("alpha");
    });
    let beta = server.mock(|when, then| {
        when.method(GET).path("/api/v4/projects/9/repository/archive.zip");
        then.status(200).body("beta");
    });

    let config = tempdir().unwrap();
    let context = PluginContext::new(config.path(), config.path().join("target"));
    env::set_var(gitlab::TOKEN_ENV, "glpat");
    env::set_var(gitlab::URL_ENV, server.base_url());
    let report = gitlab::GitlabSource::new(&context).fetch().await;
    env::remove_var(gitlab::TOKEN_ENV);
    env::remove_var(gitlab::URL_ENV);

    let report = report.unwrap();
    assert_eq!(fetched_names(&report), vec!["alpha", "beta"]);
    listing.assert_hits(1);
    alpha.assert_hits(1);
    beta.assert_hits(1);
}
